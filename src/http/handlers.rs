use super::state::AppState;
use crate::admission::QueueStatus;
use crate::audio::{ChunkBufferStats, InsertOutcome};
use crate::error::{ErrorCode, StreamError};
use crate::pipeline::FinalizeReport;
use crate::service::{ServiceStats, StartOutcome, TranscriptView};
use crate::session::{ContextUpdate, ResumePoint, SessionConfig, SessionId, SessionSnapshot};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartStreamResponse {
    Started {
        session_id: SessionId,
    },
    Queued {
        ticket_id: String,
        position: usize,
        estimated_wait_ms: u64,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkResponse {
    pub session_id: SessionId,
    pub sequence: i64,
    pub outcome: InsertOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub session_id: SessionId,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

/// `StreamError` rendered as `{ code, message }` with a matching status
pub struct ApiError(StreamError);

impl From<StreamError> for ApiError {
    fn from(err: StreamError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StreamError::SessionNotFound(_) | StreamError::TicketNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            StreamError::InvalidContext(_)
            | StreamError::InvalidConfig(_)
            | StreamError::InvalidSequence(_)
            | StreamError::InvalidAudio(_) => StatusCode::BAD_REQUEST,
            StreamError::ContextImmutable | StreamError::InvalidState { .. } => StatusCode::CONFLICT,
            StreamError::SessionLimitReached { .. } | StreamError::ResourceExhausted { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            StreamError::Transcription(_)
            | StreamError::Categorization(_)
            | StreamError::Handoff(_)
            | StreamError::Transport(_) => StatusCode::BAD_GATEWAY,
            StreamError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        };

        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }

        (
            status,
            Json(ErrorResponse {
                code: self.0.code(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /streams/stats
pub async fn get_stats(State(state): State<AppState>) -> Json<ServiceStats> {
    Json(state.service.stats().await)
}

/// POST /streams
/// Start a stream, or queue the request when capacity is reached
pub async fn start_stream(
    State(state): State<AppState>,
    Json(config): Json<SessionConfig>,
) -> ApiResult<Response> {
    let response = match state.service.start_stream(config, None).await? {
        StartOutcome::Started(session_id) => {
            info!(session_id = %session_id, "Stream started over HTTP");
            (
                StatusCode::CREATED,
                Json(StartStreamResponse::Started { session_id }),
            )
                .into_response()
        }
        StartOutcome::Queued { ticket, .. } => (
            StatusCode::ACCEPTED,
            Json(StartStreamResponse::Queued {
                ticket_id: ticket.ticket_id,
                position: ticket.position,
                estimated_wait_ms: ticket.estimated_wait_ms,
            }),
        )
            .into_response(),
    };
    Ok(response)
}

/// GET /streams/queue/:ticket_id
pub async fn get_queue_status(
    State(state): State<AppState>,
    Path(ticket_id): Path<String>,
) -> ApiResult<Json<QueueStatus>> {
    Ok(Json(state.service.queue_status(&ticket_id).await?))
}

/// DELETE /streams/queue/:ticket_id
pub async fn withdraw_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.service.withdraw(&ticket_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /streams/:id/chunks/:sequence
/// Raw audio bytes in the request body
pub async fn add_chunk(
    State(state): State<AppState>,
    Path((session_id, sequence)): Path<(String, i64)>,
    body: Bytes,
) -> ApiResult<Json<ChunkResponse>> {
    let session_id = SessionId::from(session_id);
    let outcome = state
        .service
        .add_chunk(&session_id, sequence, body.to_vec())
        .await?;

    Ok(Json(ChunkResponse {
        session_id,
        sequence,
        outcome,
    }))
}

/// PUT /streams/:id/context
pub async fn update_context(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(update): Json<ContextUpdate>,
) -> ApiResult<Json<SessionSnapshot>> {
    let session_id = SessionId::from(session_id);
    state.service.update_context(&session_id, update).await?;
    Ok(Json(state.service.snapshot(&session_id).await?))
}

/// POST /streams/:id/pause
pub async fn pause_stream(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let session_id = SessionId::from(session_id);
    state.service.pause(&session_id).await?;
    Ok(Json(StatusResponse {
        session_id,
        status: "paused".to_string(),
    }))
}

/// POST /streams/:id/resume
pub async fn resume_stream(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let session_id = SessionId::from(session_id);
    state.service.resume(&session_id).await?;
    Ok(Json(StatusResponse {
        session_id,
        status: "active".to_string(),
    }))
}

/// POST /streams/:id/stop
/// Stop streaming and run finalization (transcribe, categorize, hand off)
pub async fn stop_stream(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<FinalizeReport>> {
    let session_id = SessionId::from(session_id);
    info!(session_id = %session_id, "Stopping stream");
    Ok(Json(state.service.stop(&session_id).await?))
}

/// POST /streams/:id/cancel
pub async fn cancel_stream(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let session_id = SessionId::from(session_id);
    state.service.cancel(&session_id).await?;
    Ok(Json(StatusResponse {
        session_id,
        status: "cancelled".to_string(),
    }))
}

/// POST /streams/:id/retry
/// Resume a failed finalization
pub async fn retry_stream(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<FinalizeReport>> {
    let session_id = SessionId::from(session_id);
    Ok(Json(state.service.retry_finalization(&session_id).await?))
}

/// POST /streams/:id/reconnect
pub async fn reconnect_stream(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<ResumePoint>> {
    let session_id = SessionId::from(session_id);
    Ok(Json(state.service.reconnect(&session_id, None).await?))
}

/// GET /streams/:id/status
pub async fn get_stream_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionSnapshot>> {
    let session_id = SessionId::from(session_id);
    Ok(Json(state.service.snapshot(&session_id).await?))
}

/// GET /streams/:id/transcript
/// Transcript accumulated so far
pub async fn get_stream_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<TranscriptView>> {
    let session_id = SessionId::from(session_id);
    Ok(Json(state.service.transcript(&session_id).await?))
}

/// GET /streams/:id/events
/// Server-sent events for one session
pub async fn stream_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let session_id = SessionId::from(session_id);
    let receiver = state.service.subscribe(&session_id).await?;

    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let sse = Event::default()
                        .event(event.name())
                        .json_data(&event)
                        .unwrap_or_else(|_| Event::default().event(event.name()));
                    return Some((Ok(sse), receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged; {} events dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// DELETE /streams/:id
/// Remove a session and release everything it holds
pub async fn close_stream(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<ChunkBufferStats>> {
    let session_id = SessionId::from(session_id);
    Ok(Json(state.service.close_session(&session_id).await?))
}
