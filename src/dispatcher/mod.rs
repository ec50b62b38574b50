//! Download dispatcher split into focused submodules.
//!
//! The `Kaizoku` struct and its methods are organized by domain:
//! - [`queue`] - Queue insertion, listing, metrics
//! - [`dispatch`] - Selection, claim, worker spawn loop
//! - [`worker`] - Per-item worker lifecycle and outcome handling
//! - [`chapter`] - Chapter builder: one end-to-end acquisition
//! - [`sweeper`] - Lease reclaim for crashed workers
//! - [`control`] - Pause/resume, cancel, retry, delete
//! - [`lifecycle`] - Startup recovery and graceful shutdown

mod chapter;
mod control;
mod dispatch;
mod lifecycle;
mod queue;
mod sweeper;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_support;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use chapter::ChapterSource;
pub use queue::EnqueueRequest;

use crate::bridge::BridgeClient;
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::hub::ProgressHub;
use crate::types::ItemId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio_util::sync::CancellationToken;

/// Queue and worker state shared across the dispatcher's tasks
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Cancellation tokens of currently running workers
    pub(crate) active:
        Arc<tokio::sync::Mutex<HashMap<ItemId, CancellationToken>>>,
    /// Providers whose dispatch is advisorily paused
    pub(crate) paused_providers: Arc<std::sync::RwLock<HashSet<String>>>,
    /// Whether enqueue accepts new items (false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Wakes the dispatch loop on insert/completion/resume
    pub(crate) wake: Arc<tokio::sync::Notify>,
    /// Stops the dispatch loop and sweeper
    pub(crate) loops: CancellationToken,
}

/// The download orchestrator (cloneable - all fields are Arc-wrapped).
///
/// Owns the persistent queue, the per-provider-limited dispatch loop,
/// the lease sweeper, and the progress hub. One instance per process.
#[derive(Clone)]
pub struct Kaizoku {
    /// Database handle; public for integration tests to inspect queue rows
    pub db: Arc<Database>,
    pub(crate) hub: Arc<ProgressHub>,
    pub(crate) bridge: Arc<BridgeClient>,
    pub(crate) source: Arc<dyn ChapterSource>,
    pub(crate) config: Arc<Config>,
    pub(crate) state: QueueState,
}

impl Kaizoku {
    /// Create a new orchestrator instance.
    ///
    /// Opens the queue database (running migrations), builds the bridge
    /// client, and performs startup recovery: any item still marked
    /// Running belongs to a dead worker and is demoted to Waiting.
    pub async fn new(config: Config) -> Result<Self> {
        let bridge = Arc::new(BridgeClient::new(&config.bridge)?);
        let source: Arc<dyn ChapterSource> = bridge.clone();
        Self::build(config, bridge, source).await
    }

    pub(crate) async fn build(
        config: Config,
        bridge: Arc<BridgeClient>,
        source: Arc<dyn ChapterSource>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.storage.storage_root)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create storage root '{}': {}",
                        config.storage.storage_root.display(),
                        e
                    ),
                ))
            })?;

        let db = Database::new(&config.storage.database_path).await?;

        let recovered = db.recover_running().await?;
        if recovered > 0 {
            tracing::info!(recovered, "demoted orphaned running items to waiting");
        }

        let state = QueueState {
            active: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            paused_providers: Arc::new(std::sync::RwLock::new(HashSet::new())),
            accepting_new: Arc::new(AtomicBool::new(true)),
            wake: Arc::new(tokio::sync::Notify::new()),
            loops: CancellationToken::new(),
        };

        Ok(Self {
            db: Arc::new(db),
            hub: Arc::new(ProgressHub::new()),
            bridge,
            source,
            config: Arc::new(config),
            state,
        })
    }

    /// Start the background tasks: the dispatch loop and the lease
    /// sweeper. Both run until [`Kaizoku::shutdown`].
    pub fn start(&self) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        (self.start_dispatch_loop(), self.start_sweeper())
    }

    /// The progress hub, for publishing and for the API transport
    pub fn hub(&self) -> &Arc<ProgressHub> {
        &self.hub
    }

    /// The extension bridge client
    pub fn bridge(&self) -> &Arc<BridgeClient> {
        &self.bridge
    }

    /// The current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Number of currently running workers owned by this process
    pub async fn active_worker_count(&self) -> usize {
        self.state.active.lock().await.len()
    }
}
