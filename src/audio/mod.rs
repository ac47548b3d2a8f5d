pub mod buffer;
pub mod chunk;
pub mod energy;
pub mod wav;

pub use buffer::{ChunkBuffer, ChunkBufferConfig, ChunkBufferStats, InsertOutcome};
pub use chunk::{AudioChunk, MAX_SEQUENCE_NUMBER};
pub use energy::{SilenceGate, SpeechEnergy};
pub use wav::{encode_pcm16, pcm16_duration_ms};
