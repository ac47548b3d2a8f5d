//! HTTP API for dictation clients
//!
//! This module provides a REST API over the streaming service:
//! - POST /streams - Start a stream (201) or join the admission queue (202)
//! - GET|DELETE /streams/queue/:ticket - Queue position / withdraw
//! - POST /streams/:id/chunks/:sequence - Upload one audio chunk
//! - PUT /streams/:id/context - Change context before audio starts
//! - POST /streams/:id/{pause,resume,stop,cancel,retry,reconnect}
//! - GET /streams/:id/{status,transcript,events}
//! - DELETE /streams/:id - Close and release a session
//! - GET /streams/stats, GET /health

mod handlers;
mod routes;
mod state;

pub use handlers::{ChunkResponse, ErrorResponse, StartStreamResponse, StatusResponse};
pub use routes::create_router;
pub use state::AppState;
