//! Error-to-HTTP response conversion for API handlers.

use crate::error::{ApiError, Error, ToHttpStatus};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Render a domain error as a structured JSON response with the mapped
/// HTTP status code
pub fn error_response(error: Error) -> Response {
    let status = StatusCode::from_u16(error.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body: ApiError = error.into();
    (status, Json(body)).into_response()
}
