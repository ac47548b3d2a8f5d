pub mod admission;
pub mod audio;
pub mod clients;
pub mod config;
pub mod error;
pub mod http;
pub mod nats;
pub mod pipeline;
pub mod reaper;
pub mod service;
pub mod session;

pub use admission::{AdmissionController, QueueStatus, QueueTicket};
pub use audio::{AudioChunk, ChunkBuffer, ChunkBufferConfig, ChunkBufferStats, InsertOutcome};
pub use config::Config;
pub use error::{ErrorCode, StreamError, StreamResult};
pub use http::{create_router, AppState};
pub use nats::NatsTransport;
pub use pipeline::{
    Categorization, Categorizer, FinalizeReport, ReviewItem, ReviewStore, StreamCommand,
    StreamEvent, Transcriber, Transcription,
};
pub use reaper::spawn_reaper;
pub use service::{ReapReport, ServiceStats, StartOutcome, StreamService, TranscriptView};
pub use session::{
    ContextType, Language, PipelineStage, SessionConfig, SessionContext, SessionId, SessionStatus,
};
