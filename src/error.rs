use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{SessionId, SessionStatus};

/// Error codes surfaced to clients in `stream:error` / `categorization:error` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConnectionFailed,
    SessionLimitReached,
    ChunkTransmissionFailed,
    TranscriptionFailed,
    CategorizationFailed,
    SessionTimeout,
    InvalidAudioFormat,
    ResourceExhausted,
    SessionNotFound,
    ValidationFailed,
    ContextImmutable,
    InvalidState,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::SessionLimitReached => "SESSION_LIMIT_REACHED",
            ErrorCode::ChunkTransmissionFailed => "CHUNK_TRANSMISSION_FAILED",
            ErrorCode::TranscriptionFailed => "TRANSCRIPTION_FAILED",
            ErrorCode::CategorizationFailed => "CATEGORIZATION_FAILED",
            ErrorCode::SessionTimeout => "SESSION_TIMEOUT",
            ErrorCode::InvalidAudioFormat => "INVALID_AUDIO_FORMAT",
            ErrorCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::ContextImmutable => "CONTEXT_IMMUTABLE",
            ErrorCode::InvalidState => "INVALID_STATE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the streaming core
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    #[error("Queue ticket {0} not found")]
    TicketNotFound(String),

    #[error("Invalid session context: {0}")]
    InvalidContext(String),

    #[error("Invalid session config: {0}")]
    InvalidConfig(String),

    #[error("Session context is locked once audio streaming has started")]
    ContextImmutable,

    #[error("Invalid sequence number {0}")]
    InvalidSequence(i64),

    #[error("Invalid audio chunk: {0}")]
    InvalidAudio(String),

    #[error("Session {id} cannot {action} while {status:?}")]
    InvalidState {
        id: SessionId,
        action: &'static str,
        status: SessionStatus,
    },

    #[error("Session capacity reached ({max_sessions} active, {queued} queued)")]
    SessionLimitReached { max_sessions: usize, queued: usize },

    #[error("Resource limit exceeded: {used} of {limit} bytes buffered")]
    ResourceExhausted { used: u64, limit: u64 },

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Categorization failed: {0}")]
    Categorization(String),

    #[error("Review handoff failed: {0}")]
    Handoff(String),

    #[error("Session {0} timed out")]
    Timeout(SessionId),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl StreamError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StreamError::SessionNotFound(_) | StreamError::TicketNotFound(_) => {
                ErrorCode::SessionNotFound
            }
            StreamError::InvalidContext(_) | StreamError::InvalidConfig(_) => {
                ErrorCode::ValidationFailed
            }
            StreamError::ContextImmutable => ErrorCode::ContextImmutable,
            StreamError::InvalidSequence(_) => ErrorCode::ChunkTransmissionFailed,
            StreamError::InvalidAudio(_) => ErrorCode::InvalidAudioFormat,
            StreamError::InvalidState { .. } => ErrorCode::InvalidState,
            StreamError::SessionLimitReached { .. } => ErrorCode::SessionLimitReached,
            StreamError::ResourceExhausted { .. } => ErrorCode::ResourceExhausted,
            StreamError::Transcription(_) => ErrorCode::TranscriptionFailed,
            StreamError::Categorization(_) | StreamError::Handoff(_) => {
                ErrorCode::CategorizationFailed
            }
            StreamError::Timeout(_) => ErrorCode::SessionTimeout,
            StreamError::Transport(_) => ErrorCode::ConnectionFailed,
        }
    }
}

pub type StreamResult<T> = Result<T, StreamError>;
