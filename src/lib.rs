//! # kaizoku-dl
//!
//! Backend library for manga library managers: a persistent,
//! priority-ranked, per-provider-limited download queue feeding chapter
//! acquisition workers that fetch pages through an external extension
//! host and write verified CBZ archives, with live progress fan-out.
//!
//! ## Design Philosophy
//!
//! kaizoku-dl is designed to be:
//! - **Database-authoritative** - Queue ordering and concurrency
//!   accounting live in the sqlite rows, never in memory
//! - **Crash-tolerant** - Claims are leases; a dead worker's item is
//!   reclaimed by the sweeper or on restart
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Clients subscribe to the progress hub, no
//!   polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use kaizoku_dl::{Config, Kaizoku};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let kaizoku = Kaizoku::new(config).await?;
//!
//!     // Start the dispatch loop and lease sweeper
//!     kaizoku.start();
//!
//!     // Run until SIGTERM/SIGINT, then shut down gracefully
//!     kaizoku_dl::run_with_shutdown(kaizoku).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API and progress transport
pub mod api;
/// CBZ packaging and verification
pub mod archive;
/// Extension host HTTP client
pub mod bridge;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Download dispatcher (queue, workers, chapter builder)
pub mod dispatcher;
/// Error types
pub mod error;
/// Progress publish/subscribe hub
pub mod hub;
/// Library storage layout
pub mod library;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use archive::{ArchiveCheck, ChapterDescriptor};
pub use bridge::BridgeClient;
pub use config::Config;
pub use db::Database;
pub use dispatcher::{ChapterSource, EnqueueRequest, Kaizoku};
pub use error::{ApiError, Error, ErrorDetail, ErrorKind, Result, ToHttpStatus};
pub use hub::{ProgressHub, ProgressStream};
pub use types::{
    DownloadArgs, FailedAction, ItemId, JobKind, ListFilter, ProgressEvent, ProgressStatus,
    QueueItem, QueueMetrics, SourceReport, Status,
};

/// Helper function to run the orchestrator with graceful signal handling.
///
/// Waits for a termination signal and then calls [`Kaizoku::shutdown`].
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(kaizoku: Kaizoku) -> Result<()> {
    wait_for_signal().await;
    kaizoku.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("received SIGTERM signal");
            } else {
                tracing::error!("could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for Ctrl+C signal");
        }
    }
}
