//! Route handlers for the REST API.

use crate::api::AppState;
use crate::api::error_response::error_response;
use crate::dispatcher::EnqueueRequest;
use crate::types::{ItemId, ListFilter, Status};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

/// Query parameters for GET /downloads
#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct ListQuery {
    /// Filter by status
    pub status: Option<Status>,
    /// Filter by series
    pub series_id: Option<i64>,
    /// Substring match against payload and error message
    pub keyword: Option<String>,
    /// Maximum number of items to return (default: 50)
    pub limit: Option<i64>,
    /// Number of items to skip (default: 0)
    pub offset: Option<i64>,
}

/// Response for GET /downloads
#[derive(Debug, Serialize, ToSchema)]
pub struct ListResponse {
    /// Total items matching the filter
    pub total: i64,
    /// The requested page
    pub items: Vec<crate::types::QueueItem>,
}

/// Response for POST /downloads
#[derive(Debug, Serialize, ToSchema)]
pub struct EnqueueResponse {
    /// The created (or deduplicated) item id
    pub id: ItemId,
}

/// POST /downloads - Enqueue a chapter download
#[utoipa::path(
    post,
    path = "/api/v1/downloads",
    tag = "queue",
    request_body = EnqueueRequest,
    responses(
        (status = 201, description = "Item enqueued (or deduplicated)", body = EnqueueResponse),
        (status = 404, description = "Series or binding not found"),
        (status = 503, description = "Shutting down")
    )
)]
pub async fn enqueue_download(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> Response {
    match state.kaizoku.enqueue(request).await {
        Ok(id) => (StatusCode::CREATED, Json(EnqueueResponse { id })).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /downloads - List queue items
#[utoipa::path(
    get,
    path = "/api/v1/downloads",
    tag = "queue",
    responses(
        (status = 200, description = "Matching queue items", body = ListResponse)
    )
)]
pub async fn list_downloads(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let filter = ListFilter {
        status: query.status,
        series_id: query.series_id,
        keyword: query.keyword,
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    match state.kaizoku.list(&filter, limit, offset).await {
        Ok((total, items)) => {
            (StatusCode::OK, Json(ListResponse { total, items })).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// GET /downloads/:id - Get a single queue item
#[utoipa::path(
    get,
    path = "/api/v1/downloads/{id}",
    tag = "queue",
    responses(
        (status = 200, description = "The queue item", body = crate::types::QueueItem),
        (status = 404, description = "Item not found")
    )
)]
pub async fn get_download(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.kaizoku.get_item(ItemId(id)).await {
        Ok(item) => (StatusCode::OK, Json(item)).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /downloads/:id/cancel - Cancel a waiting or running item
#[utoipa::path(
    post,
    path = "/api/v1/downloads/{id}/cancel",
    tag = "queue",
    responses(
        (status = 204, description = "Cancellation applied or signalled"),
        (status = 404, description = "Item not found"),
        (status = 409, description = "Item is terminal")
    )
)]
pub async fn cancel_download(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.kaizoku.cancel_item(ItemId(id)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /downloads/:id/retry - Requeue a failed item
#[utoipa::path(
    post,
    path = "/api/v1/downloads/{id}/retry",
    tag = "queue",
    responses(
        (status = 204, description = "Item requeued"),
        (status = 404, description = "Item not found"),
        (status = 409, description = "Item is not failed")
    )
)]
pub async fn retry_download(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.kaizoku.retry_item(ItemId(id)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// DELETE /downloads/:id - Remove a non-running item
#[utoipa::path(
    delete,
    path = "/api/v1/downloads/{id}",
    tag = "queue",
    responses(
        (status = 204, description = "Item removed"),
        (status = 404, description = "Item not found"),
        (status = 409, description = "Item is running")
    )
)]
pub async fn delete_download(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.kaizoku.delete_item(ItemId(id)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /queue/metrics - Queue counters
#[utoipa::path(
    get,
    path = "/api/v1/queue/metrics",
    tag = "queue",
    responses(
        (status = 200, description = "Queue counters", body = crate::types::QueueMetrics)
    )
)]
pub async fn queue_metrics(State(state): State<AppState>) -> Response {
    match state.kaizoku.metrics().await {
        Ok(metrics) => (StatusCode::OK, Json(metrics)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /queue/report - Per-provider failure report
#[utoipa::path(
    get,
    path = "/api/v1/queue/report",
    tag = "queue",
    responses(
        (status = 200, description = "Per-provider aggregates", body = [crate::types::SourceReport])
    )
)]
pub async fn source_report(State(state): State<AppState>) -> Response {
    match state.kaizoku.source_report().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /providers/:id/pause - Pause dispatch for a provider
#[utoipa::path(
    post,
    path = "/api/v1/providers/{id}/pause",
    tag = "control",
    responses((status = 204, description = "Provider paused"))
)]
pub async fn pause_provider(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    state.kaizoku.pause_provider(&id);
    StatusCode::NO_CONTENT.into_response()
}

/// POST /providers/:id/resume - Resume dispatch for a provider
#[utoipa::path(
    post,
    path = "/api/v1/providers/{id}/resume",
    tag = "control",
    responses((status = 204, description = "Provider resumed"))
)]
pub async fn resume_provider(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    state.kaizoku.resume_provider(&id);
    StatusCode::NO_CONTENT.into_response()
}

/// POST /series/:id/pause - Pause dispatch for a series
#[utoipa::path(
    post,
    path = "/api/v1/series/{id}/pause",
    tag = "control",
    responses(
        (status = 204, description = "Series paused"),
        (status = 404, description = "Series not found")
    )
)]
pub async fn pause_series(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.kaizoku.pause_series(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /series/:id/resume - Resume dispatch for a series
#[utoipa::path(
    post,
    path = "/api/v1/series/{id}/resume",
    tag = "control",
    responses(
        (status = 204, description = "Series resumed"),
        (status = 404, description = "Series not found")
    )
)]
pub async fn resume_series(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.kaizoku.resume_series(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /health - Health check
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "system",
    responses((status = 200, description = "Service is healthy"))
)]
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /openapi.json - OpenAPI specification
#[utoipa::path(
    get,
    path = "/api/v1/openapi.json",
    tag = "system",
    responses((status = 200, description = "OpenAPI 3.1 specification in JSON format"))
)]
pub async fn openapi_spec() -> impl IntoResponse {
    use crate::api::openapi::ApiDoc;
    use utoipa::OpenApi;

    Json(ApiDoc::openapi())
}

/// POST /shutdown - Graceful shutdown
#[utoipa::path(
    post,
    path = "/api/v1/shutdown",
    tag = "system",
    responses((status = 202, description = "Shutdown initiated"))
)]
pub async fn shutdown(State(state): State<AppState>) -> impl IntoResponse {
    tokio::spawn(async move {
        // Small delay so the HTTP response gets out first
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        if let Err(e) = state.kaizoku.shutdown().await {
            tracing::error!(error = %e, "error during graceful shutdown");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "shutdown initiated"})),
    )
}
