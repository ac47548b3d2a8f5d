use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, StreamError};
use crate::session::{ContextUpdate, SessionConfig, SessionId, TranscriptSegment};

/// Inbound transport events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum StreamCommand {
    #[serde(rename = "stream:start")]
    Start(SessionConfig),

    #[serde(rename = "stream:chunk")]
    Chunk {
        session_id: SessionId,
        sequence: i64,
        /// Base64-encoded audio bytes
        data: String,
    },

    #[serde(rename = "stream:pause")]
    Pause { session_id: SessionId },

    #[serde(rename = "stream:resume")]
    Resume { session_id: SessionId },

    #[serde(rename = "stream:stop")]
    Stop { session_id: SessionId },

    #[serde(rename = "stream:cancel")]
    Cancel { session_id: SessionId },

    #[serde(rename = "stream:context")]
    UpdateContext {
        session_id: SessionId,
        #[serde(flatten)]
        context: ContextUpdate,
    },

    #[serde(rename = "stream:reconnect")]
    Reconnect { session_id: SessionId },
}

/// Outbound events, published per session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum StreamEvent {
    #[serde(rename = "stream:started")]
    Started { session_id: SessionId },

    #[serde(rename = "stream:queued")]
    Queued {
        ticket_id: String,
        position: usize,
        estimated_wait_ms: u64,
    },

    #[serde(rename = "stream:paused")]
    Paused { session_id: SessionId },

    #[serde(rename = "stream:resumed")]
    Resumed { session_id: SessionId },

    #[serde(rename = "stream:transcription")]
    Transcription {
        text: String,
        confidence: f32,
        is_final: bool,
        segments: Vec<TranscriptSegment>,
    },

    #[serde(rename = "stream:error")]
    Error { code: ErrorCode, message: String },

    #[serde(rename = "stream:complete")]
    Complete {
        transcript: String,
        session_id: SessionId,
    },

    #[serde(rename = "categorization:started")]
    CategorizationStarted { session_id: SessionId },

    #[serde(rename = "categorization:complete")]
    CategorizationComplete {
        review_id: String,
        categories: Vec<String>,
    },

    #[serde(rename = "categorization:error")]
    CategorizationError { code: ErrorCode, message: String },
}

impl StreamEvent {
    pub fn error(err: &StreamError) -> Self {
        StreamEvent::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }

    /// Failure after the transcript was complete; the transcript itself is unaffected
    pub fn categorization_error(err: &StreamError) -> Self {
        StreamEvent::CategorizationError {
            code: err.code(),
            message: err.to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Started { .. } => "stream:started",
            StreamEvent::Queued { .. } => "stream:queued",
            StreamEvent::Paused { .. } => "stream:paused",
            StreamEvent::Resumed { .. } => "stream:resumed",
            StreamEvent::Transcription { .. } => "stream:transcription",
            StreamEvent::Error { .. } => "stream:error",
            StreamEvent::Complete { .. } => "stream:complete",
            StreamEvent::CategorizationStarted { .. } => "categorization:started",
            StreamEvent::CategorizationComplete { .. } => "categorization:complete",
            StreamEvent::CategorizationError { .. } => "categorization:error",
        }
    }
}
