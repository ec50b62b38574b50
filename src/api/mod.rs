//! REST API server module
//!
//! A thin surface over the orchestrator: queue insertion and
//! management, operational metrics, and the progress protocol
//! (negotiate + WebSocket stream).

use crate::config::Config;
use crate::dispatcher::Kaizoku;
use crate::error::Result;
use axum::{
    Router,
    http::HeaderValue,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

pub mod error_response;
pub mod openapi;
pub mod progress;
pub mod routes;

pub use openapi::ApiDoc;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    /// The orchestrator instance serving this API
    pub kaizoku: Arc<Kaizoku>,
}

impl AppState {
    /// Create the handler state
    pub fn new(kaizoku: Arc<Kaizoku>) -> Self {
        Self { kaizoku }
    }
}

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Queue
/// - `POST /api/v1/downloads` - Enqueue a chapter download
/// - `GET /api/v1/downloads` - List queue items (filter + pagination)
/// - `GET /api/v1/downloads/:id` - Get a single item
/// - `POST /api/v1/downloads/:id/cancel` - Cancel a waiting/running item
/// - `POST /api/v1/downloads/:id/retry` - Requeue a failed item
/// - `DELETE /api/v1/downloads/:id` - Remove a non-running item
/// - `GET /api/v1/queue/metrics` - Queue counters
/// - `GET /api/v1/queue/report` - Per-provider failure report
///
/// ## Pause control
/// - `POST /api/v1/providers/:id/pause` / `.../resume`
/// - `POST /api/v1/series/:id/pause` / `.../resume`
///
/// ## System
/// - `GET /api/v1/health` - Health check
/// - `GET /api/v1/openapi.json` - OpenAPI specification
/// - `POST /api/v1/shutdown` - Graceful shutdown
///
/// ## Progress protocol
/// - `POST /progress/negotiate` - Open a progress session
/// - `GET /progress` - Attach the session's WebSocket stream
pub fn create_router(kaizoku: Arc<Kaizoku>, config: Arc<Config>) -> Router {
    let state = AppState::new(kaizoku);

    let router = Router::new()
        // Queue
        .route("/api/v1/downloads", post(routes::enqueue_download))
        .route("/api/v1/downloads", get(routes::list_downloads))
        .route("/api/v1/downloads/:id", get(routes::get_download))
        .route("/api/v1/downloads/:id", delete(routes::delete_download))
        .route("/api/v1/downloads/:id/cancel", post(routes::cancel_download))
        .route("/api/v1/downloads/:id/retry", post(routes::retry_download))
        .route("/api/v1/queue/metrics", get(routes::queue_metrics))
        .route("/api/v1/queue/report", get(routes::source_report))
        // Pause control
        .route("/api/v1/providers/:id/pause", post(routes::pause_provider))
        .route("/api/v1/providers/:id/resume", post(routes::resume_provider))
        .route("/api/v1/series/:id/pause", post(routes::pause_series))
        .route("/api/v1/series/:id/resume", post(routes::resume_series))
        // System
        .route("/api/v1/health", get(routes::health_check))
        .route("/api/v1/openapi.json", get(routes::openapi_spec))
        .route("/api/v1/shutdown", post(routes::shutdown))
        // Progress protocol
        .route("/progress/negotiate", post(progress::negotiate))
        .route("/progress", get(progress::attach_stream));

    let router = router.with_state(state);

    if config.api.cors_enabled {
        router.layer(build_cors_layer(&config.api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins; "*" or an empty list
/// allows any origin
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Runs until the server stops, either due to an error or process
/// shutdown.
pub async fn start_api_server(kaizoku: Arc<Kaizoku>, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;

    tracing::info!(address = %bind_address, "starting API server");

    let app = create_router(kaizoku, config);
    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}
