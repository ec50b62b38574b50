//! OpenAPI documentation for the REST surface.

use utoipa::OpenApi;

/// OpenAPI specification for the kaizoku-dl API
#[derive(OpenApi)]
#[openapi(
    info(
        title = "kaizoku-dl API",
        description = "Queue insertion, queue management, and the progress protocol",
        license(name = "MIT OR Apache-2.0")
    ),
    paths(
        crate::api::routes::enqueue_download,
        crate::api::routes::list_downloads,
        crate::api::routes::get_download,
        crate::api::routes::cancel_download,
        crate::api::routes::retry_download,
        crate::api::routes::delete_download,
        crate::api::routes::queue_metrics,
        crate::api::routes::source_report,
        crate::api::routes::pause_provider,
        crate::api::routes::resume_provider,
        crate::api::routes::pause_series,
        crate::api::routes::resume_series,
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::shutdown,
        crate::api::progress::negotiate,
        crate::api::progress::attach_stream,
    ),
    components(schemas(
        crate::dispatcher::EnqueueRequest,
        crate::api::routes::ListQuery,
        crate::api::routes::ListResponse,
        crate::api::routes::EnqueueResponse,
        crate::api::progress::NegotiateRequest,
        crate::api::progress::NegotiateResponse,
        crate::types::ItemId,
        crate::types::Status,
        crate::types::JobKind,
        crate::types::ProgressStatus,
        crate::types::ProgressEvent,
        crate::types::ChapterCard,
        crate::types::DownloadArgs,
        crate::types::QueueItem,
        crate::types::QueueMetrics,
        crate::types::SourceReport,
        crate::types::FailedAction,
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "queue", description = "Download queue"),
        (name = "control", description = "Pause and resume"),
        (name = "system", description = "Health and lifecycle"),
        (name = "progress", description = "Progress protocol")
    )
)]
pub struct ApiDoc;
