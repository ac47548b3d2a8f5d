//! Dictation session management
//!
//! This module provides the `StreamSession` state machine and the registry that owns it:
//! - Validated session context (patient / global) that locks on the first audio chunk
//! - Lifecycle status (active, paused, idle, processing, completed)
//! - Append-only transcript and per-session chunk buffer
//! - Socket bindings used for disconnect handling

mod config;
mod registry;
mod session;
mod stats;

pub use config::{
    ContextType, ContextUpdate, Language, SessionConfig, SessionContext, SessionId, SessionRequest,
};
pub use registry::{SessionHandle, SessionRegistry};
pub use session::{FailedStage, PipelineStage, SessionStatus, StreamSession, TranscriptBuffer};
pub use stats::{ResumePoint, SessionSnapshot, TranscriptSegment};
