//! HTTP clients for the pipeline collaborators
//!
//! - `whisper`: speech-to-text over the whisper transcription API
//! - `categorizer`: transcript categorization via the backend API
//! - `review_store`: review queue, remote or in-memory

pub mod categorizer;
pub mod review_store;
pub mod whisper;

pub use categorizer::HttpCategorizer;
pub use review_store::{HttpReviewStore, MemoryReviewStore};
pub use whisper::WhisperTranscriber;
