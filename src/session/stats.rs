use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::{ContextType, Language, SessionId};
use super::session::{PipelineStage, SessionStatus};

/// Point-in-time view of a session, safe to hand to transports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub user_id: String,
    pub context_type: ContextType,
    pub patient_id: Option<String>,
    pub language: Language,
    pub status: SessionStatus,
    pub stage: PipelineStage,

    /// Whether the context has been locked by the first audio chunk
    pub context_locked: bool,

    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,

    /// Length of the accumulated transcript in bytes
    pub transcript_len: usize,

    /// Mean confidence over all transcribed segments
    pub confidence: Option<f32>,

    /// Next sequence number the server is waiting for
    pub next_sequence: u64,

    /// Chunks received but not yet transcribed
    pub pending_chunks: usize,

    /// Missing sequence numbers below the highest received
    pub missing_chunks: Vec<u64>,

    pub buffered_bytes: u64,
    pub review_id: Option<String>,
}

/// A single transcribed segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// First chunk sequence number of the batch this segment came from
    pub sequence_start: u64,

    /// Transcribed text
    pub text: String,

    /// Confidence score (0.0 to 1.0)
    pub confidence: f32,

    /// Confidence fell below the uncertainty threshold
    pub is_uncertain: bool,

    /// Offsets within the transcribed batch, if the engine reported them
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,

    /// When this segment was produced
    pub timestamp: DateTime<Utc>,
}

/// Where a reconnecting client should resume streaming
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub session_id: SessionId,
    /// Next sequence number the server has not yet resolved
    pub next_sequence: u64,
    /// Sequence numbers still missing below the highest received
    pub missing: Vec<u64>,
    pub transcript_len: usize,
}
