//! Transcription -> categorization -> review handoff
//!
//! - `collaborators`: traits for the speech-to-text engine, categorizer and review store
//! - `events`: inbound commands and outbound per-session events
//! - `processor`: per-session worker and finalization steps
//! - `resources`: aggregate buffered-audio guard

pub mod collaborators;
pub mod events;
pub mod processor;
pub mod resources;

pub use collaborators::{
    Categorization, Categorizer, ReviewItem, ReviewStore, SpeechSegment, Transcriber,
    Transcription,
};
pub use events::{StreamCommand, StreamEvent};
pub use processor::{FinalizeReport, Pipeline, PipelineSettings, RetryPolicy};
pub use resources::ResourceGuard;
