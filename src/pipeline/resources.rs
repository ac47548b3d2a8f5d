use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::error::{StreamError, StreamResult};

/// Tracks audio buffered across all sessions against configured ceilings
#[derive(Debug)]
pub struct ResourceGuard {
    buffered_bytes: AtomicU64,
    max_buffered_bytes: u64,
    max_session_buffer_bytes: u64,
}

impl ResourceGuard {
    pub fn new(max_buffered_bytes: u64, max_session_buffer_bytes: u64) -> Self {
        Self {
            buffered_bytes: AtomicU64::new(0),
            max_buffered_bytes,
            max_session_buffer_bytes,
        }
    }

    /// Whether new sessions may be admitted
    pub fn has_headroom(&self) -> bool {
        self.buffered_bytes() < self.max_buffered_bytes
    }

    /// Check a single session's unprocessed backlog before accepting `incoming` more bytes
    pub fn check_session(&self, unprocessed_bytes: u64, incoming: u64) -> StreamResult<()> {
        let used = unprocessed_bytes + incoming;
        if used > self.max_session_buffer_bytes {
            warn!(
                "Session backlog {} bytes exceeds per-session limit {}",
                used, self.max_session_buffer_bytes
            );
            return Err(StreamError::ResourceExhausted {
                used,
                limit: self.max_session_buffer_bytes,
            });
        }
        Ok(())
    }

    pub fn reserve(&self, bytes: u64) {
        self.buffered_bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn release(&self, bytes: u64) {
        let _ = self
            .buffered_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    pub fn buffered_bytes(&self) -> u64 {
        self.buffered_bytes.load(Ordering::SeqCst)
    }

    pub fn max_buffered_bytes(&self) -> u64 {
        self.max_buffered_bytes
    }
}
