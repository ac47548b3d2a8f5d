use chrono::{DateTime, Utc};

use crate::error::{StreamError, StreamResult};

/// Highest sequence number a client may send
pub const MAX_SEQUENCE_NUMBER: i64 = u32::MAX as i64;

/// A single sequence-numbered unit of captured audio
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Client-assigned position in the session's audio stream
    pub sequence_number: u64,
    /// Raw audio bytes (opaque to the buffer)
    pub payload: Vec<u8>,
    /// When the chunk reached the server
    pub received_at: DateTime<Utc>,
    /// Set once the chunk has been consumed by a transcription call
    pub processed: bool,
}

impl AudioChunk {
    /// Validate a chunk as received from the transport
    ///
    /// Negative or out-of-range sequence numbers are rejected, as are payloads that
    /// are empty or do not hold a whole number of 16-bit samples.
    pub fn new(sequence_number: i64, payload: Vec<u8>) -> StreamResult<Self> {
        if !(0..=MAX_SEQUENCE_NUMBER).contains(&sequence_number) {
            return Err(StreamError::InvalidSequence(sequence_number));
        }
        if payload.is_empty() {
            return Err(StreamError::InvalidAudio(format!(
                "chunk {} has an empty payload",
                sequence_number
            )));
        }
        if payload.len() % 2 != 0 {
            return Err(StreamError::InvalidAudio(format!(
                "chunk {} has an odd byte count ({}); PCM16 samples are 2 bytes",
                sequence_number,
                payload.len()
            )));
        }

        Ok(Self {
            sequence_number: sequence_number as u64,
            payload,
            received_at: Utc::now(),
            processed: false,
        })
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
