//! Progress protocol endpoints: session negotiation and the WebSocket
//! stream.
//!
//! Message framing is JSON per message. Server-to-client frames are
//! [`ProgressEvent`]s; client-to-server frames are
//! `{"type": "subscribe"|"unsubscribe", "job_id": "..."}` and adjust
//! the session's job filter.

use crate::api::AppState;
use crate::api::error_response::error_response;
use crate::hub::ProgressStream;
use axum::{
    Json,
    extract::{Query, State},
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request body for POST /progress/negotiate
#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct NegotiateRequest {
    /// Free-form client identifier for logging
    #[serde(default)]
    pub client_id: Option<String>,
}

/// Response for POST /progress/negotiate
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NegotiateResponse {
    /// Session id to present when attaching the stream
    pub connection_id: String,
}

/// Query parameters for GET /progress
#[derive(Debug, Deserialize)]
pub struct AttachQuery {
    /// The negotiated session id
    pub id: String,
}

/// Client-to-server frame adjusting the session's job filter
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame {
    /// Narrow the stream to a job
    Subscribe {
        /// Job id, e.g. `download:42`
        job_id: String,
    },
    /// Widen the stream again
    Unsubscribe {
        /// Job id, e.g. `download:42`
        job_id: String,
    },
}

/// POST /progress/negotiate - Open a progress session
#[utoipa::path(
    post,
    path = "/progress/negotiate",
    tag = "progress",
    request_body = NegotiateRequest,
    responses(
        (status = 200, description = "Session created", body = NegotiateResponse)
    )
)]
pub async fn negotiate(
    State(state): State<AppState>,
    body: Option<Json<NegotiateRequest>>,
) -> impl IntoResponse {
    let hint = body.as_ref().and_then(|b| b.client_id.as_deref());
    let connection_id = state.kaizoku.hub().negotiate(hint);
    (StatusCode::OK, Json(NegotiateResponse { connection_id }))
}

/// GET /progress - Attach the session's WebSocket stream
#[utoipa::path(
    get,
    path = "/progress",
    tag = "progress",
    responses(
        (status = 101, description = "Switching to the WebSocket transport"),
        (status = 404, description = "Unknown or expired session")
    )
)]
pub async fn attach_stream(
    State(state): State<AppState>,
    Query(query): Query<AttachQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let stream = match state.kaizoku.hub().attach(&query.id) {
        Ok(stream) => stream,
        Err(e) => return error_response(e),
    };

    ws.on_upgrade(move |socket| drive_progress_socket(socket, stream))
}

/// Pump events out and subscription frames in until either side closes
async fn drive_progress_socket(mut socket: WebSocket, mut stream: ProgressStream) {
    loop {
        tokio::select! {
            event = stream.events.recv() => {
                let Some(event) = event else { break };
                let Ok(frame) = serde_json::to_string(&event) else {
                    tracing::warn!("failed to serialize progress event");
                    continue;
                };
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Subscribe { job_id }) => stream.subscribe_job(&job_id),
                            Ok(ClientFrame::Unsubscribe { job_id }) => {
                                stream.unsubscribe_job(&job_id)
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "ignoring malformed progress frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "progress socket error");
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!(session = %stream.session_id, "progress socket closed");
    // Dropping the stream detaches the subscription
}
