// Per-session chunk buffer
//
// Chunks arrive over the network in arbitrary order. The buffer keeps them in
// an ordered map keyed by sequence number and hands out the longest
// contiguous run starting at the next expected sequence number. Transcribed
// text is recorded against the first sequence number of each batch so that
// the assembled transcription always reads in audio order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, warn};

use super::chunk::AudioChunk;
use crate::error::{StreamError, StreamResult};

/// Chunk buffer configuration
#[derive(Debug, Clone)]
pub struct ChunkBufferConfig {
    /// Maximum distance a chunk may run ahead of the next expected sequence number
    pub max_reorder_window: u64,
    /// How long a gap may block readiness before the missing chunks are skipped.
    /// `None` waits forever (until `force_skip_gaps`).
    pub gap_skip_timeout: Option<Duration>,
}

impl Default for ChunkBufferConfig {
    fn default() -> Self {
        Self {
            max_reorder_window: 4096,
            gap_skip_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// Result of inserting a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    /// Chunk stored
    Inserted,
    /// Sequence number already buffered or processed; nothing changed
    Duplicate,
    /// Sequence number was skipped after a gap timeout; nothing changed
    Stale,
}

/// Final statistics returned when a buffer is cleared
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkBufferStats {
    /// Unique chunks accepted over the buffer's lifetime
    pub total_chunks: usize,
    /// Bytes accepted over the buffer's lifetime
    pub total_bytes: u64,
    pub processed_chunks: usize,
    pub skipped_chunks: usize,
    /// Chunks that arrived after their sequence number had been skipped
    pub late_chunks: usize,
}

#[derive(Debug, Clone)]
struct TranscribedSpan {
    text: String,
    confidence: f32,
}

/// Ordered buffer of received audio chunks for one session
#[derive(Debug)]
pub struct ChunkBuffer {
    config: ChunkBufferConfig,
    chunks: BTreeMap<u64, AudioChunk>,
    skipped: BTreeSet<u64>,
    spans: BTreeMap<u64, TranscribedSpan>,
    next_expected: u64,
    highest_received: Option<u64>,
    gap_observed_at: Option<DateTime<Utc>>,
    total_chunks: usize,
    total_bytes: u64,
    processed_chunks: usize,
    late_chunks: usize,
    retained_bytes: u64,
    unprocessed_bytes: u64,
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        Self::new(ChunkBufferConfig::default())
    }
}

impl ChunkBuffer {
    pub fn new(config: ChunkBufferConfig) -> Self {
        Self {
            config,
            chunks: BTreeMap::new(),
            skipped: BTreeSet::new(),
            spans: BTreeMap::new(),
            next_expected: 0,
            highest_received: None,
            gap_observed_at: None,
            total_chunks: 0,
            total_bytes: 0,
            processed_chunks: 0,
            late_chunks: 0,
            retained_bytes: 0,
            unprocessed_bytes: 0,
        }
    }

    /// Insert a chunk; re-inserting a known sequence number is a no-op
    pub fn insert(&mut self, chunk: AudioChunk) -> StreamResult<InsertOutcome> {
        let seq = chunk.sequence_number;

        if self.skipped.contains(&seq) {
            self.late_chunks += 1;
            warn!("Chunk {} arrived after it was skipped; ignoring", seq);
            return Ok(InsertOutcome::Stale);
        }
        if seq < self.next_expected || self.chunks.contains_key(&seq) {
            debug!("Duplicate chunk {} ignored", seq);
            return Ok(InsertOutcome::Duplicate);
        }
        if seq - self.next_expected > self.config.max_reorder_window {
            return Err(StreamError::InvalidSequence(seq as i64));
        }

        let received_at = chunk.received_at;
        let bytes = chunk.len() as u64;
        self.total_chunks += 1;
        self.total_bytes += bytes;
        self.retained_bytes += bytes;
        self.unprocessed_bytes += bytes;
        self.highest_received = Some(self.highest_received.map_or(seq, |h| h.max(seq)));
        self.chunks.insert(seq, chunk);
        self.refresh_gap_marker(received_at);

        Ok(InsertOutcome::Inserted)
    }

    /// Ready chunks using the current time for gap-skip decisions
    pub fn ready_chunks(&mut self, max_count: usize) -> Vec<AudioChunk> {
        self.ready_chunks_at(max_count, Utc::now())
    }

    /// Longest run of unprocessed chunks contiguous from the next expected
    /// sequence number, stopping at the first gap
    pub fn ready_chunks_at(&mut self, max_count: usize, now: DateTime<Utc>) -> Vec<AudioChunk> {
        self.skip_expired_gap(now);

        let mut ready = Vec::new();
        let mut expected = self.next_expected;
        while ready.len() < max_count {
            match self.chunks.get(&expected) {
                Some(chunk) if !chunk.processed => ready.push(chunk.clone()),
                Some(_) => {}
                None if self.skipped.contains(&expected) => {}
                None => break,
            }
            expected += 1;
        }
        ready
    }

    /// Missing sequence numbers below the highest received one
    pub fn check_for_gaps(&self) -> Vec<u64> {
        let Some(highest) = self.highest_received else {
            return Vec::new();
        };

        (self.next_expected..highest)
            .filter(|seq| !self.chunks.contains_key(seq) && !self.skipped.contains(seq))
            .collect()
    }

    /// Mark chunks as processed and record their transcription
    ///
    /// Returns the number of chunks newly marked. Unknown or already-processed
    /// sequence numbers are ignored.
    pub fn mark_processed(&mut self, sequence_numbers: &[u64], text: &str, confidence: f32) -> usize {
        let mut first_marked: Option<u64> = None;
        let mut marked = 0;

        for seq in sequence_numbers {
            if let Some(chunk) = self.chunks.get_mut(seq) {
                if chunk.processed {
                    continue;
                }
                chunk.processed = true;
                self.unprocessed_bytes -= chunk.len() as u64;
                first_marked = Some(first_marked.map_or(*seq, |f| f.min(*seq)));
                marked += 1;
            }
        }

        let Some(first) = first_marked else {
            return 0;
        };

        let text = text.trim();
        if !text.is_empty() {
            self.spans.insert(
                first,
                TranscribedSpan {
                    text: text.to_string(),
                    confidence,
                },
            );
        }

        self.processed_chunks += marked;
        self.advance();
        self.refresh_gap_marker(Utc::now());
        marked
    }

    /// Skip every outstanding gap immediately (no more audio is coming)
    pub fn force_skip_gaps(&mut self) -> Vec<u64> {
        let missing = self.check_for_gaps();
        if !missing.is_empty() {
            warn!("Skipping {} missing chunks: {:?}", missing.len(), missing);
            self.skipped.extend(missing.iter().copied());
            self.advance();
        }
        self.gap_observed_at = None;
        missing
    }

    /// All unprocessed chunks in sequence order
    pub fn all_unprocessed_chunks(&self) -> Vec<&AudioChunk> {
        self.chunks.values().filter(|c| !c.processed).collect()
    }

    /// Raw payloads of every retained chunk, concatenated in sequence order
    pub fn combined_audio(&self) -> Vec<u8> {
        let mut audio = Vec::with_capacity(self.retained_bytes as usize);
        for chunk in self.chunks.values() {
            audio.extend_from_slice(&chunk.payload);
        }
        audio
    }

    /// Transcribed text of all processed batches, in sequence order
    pub fn assembled_transcription(&self) -> String {
        self.spans
            .values()
            .map(|span| span.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Mean confidence of the recorded transcription spans
    pub fn average_confidence(&self) -> Option<f32> {
        if self.spans.is_empty() {
            return None;
        }
        let sum: f32 = self.spans.values().map(|s| s.confidence).sum();
        Some(sum / self.spans.len() as f32)
    }

    /// Drop payloads of processed chunks behind the read cursor
    pub fn dispose_processed(&mut self) -> u64 {
        let disposable: Vec<u64> = self
            .chunks
            .range(..self.next_expected)
            .filter(|(_, c)| c.processed)
            .map(|(seq, _)| *seq)
            .collect();

        let mut freed = 0;
        for seq in disposable {
            if let Some(chunk) = self.chunks.remove(&seq) {
                freed += chunk.len() as u64;
            }
        }
        self.retained_bytes -= freed;
        freed
    }

    /// Release all storage and return lifetime statistics
    pub fn clear(&mut self) -> ChunkBufferStats {
        let stats = self.stats();
        self.chunks.clear();
        self.spans.clear();
        self.retained_bytes = 0;
        self.unprocessed_bytes = 0;
        self.gap_observed_at = None;
        stats
    }

    pub fn stats(&self) -> ChunkBufferStats {
        ChunkBufferStats {
            total_chunks: self.total_chunks,
            total_bytes: self.total_bytes,
            processed_chunks: self.processed_chunks,
            skipped_chunks: self.skipped.len(),
            late_chunks: self.late_chunks,
        }
    }

    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Bytes currently held (processed and unprocessed)
    pub fn buffered_bytes(&self) -> u64 {
        self.retained_bytes
    }

    pub fn unprocessed_bytes(&self) -> u64 {
        self.unprocessed_bytes
    }

    pub fn has_unprocessed(&self) -> bool {
        self.chunks.values().any(|c| !c.processed)
    }

    fn advance(&mut self) {
        loop {
            let resolved = self.skipped.contains(&self.next_expected)
                || self
                    .chunks
                    .get(&self.next_expected)
                    .map_or(false, |c| c.processed);
            if !resolved {
                break;
            }
            self.next_expected += 1;
        }
    }

    /// Track when the chunk at the read cursor first went missing
    fn refresh_gap_marker(&mut self, now: DateTime<Utc>) {
        let waiting_on_gap = !self.chunks.contains_key(&self.next_expected)
            && self.chunks.range(self.next_expected..).next().is_some();

        if !waiting_on_gap {
            self.gap_observed_at = None;
        } else if self.gap_observed_at.is_none() {
            self.gap_observed_at = Some(now);
        }
    }

    fn skip_expired_gap(&mut self, now: DateTime<Utc>) {
        let (Some(timeout), Some(since)) = (self.config.gap_skip_timeout, self.gap_observed_at) else {
            return;
        };
        let waited = now.signed_duration_since(since).to_std().unwrap_or_default();
        if waited < timeout {
            return;
        }

        let Some(next_buffered) = self.chunks.range(self.next_expected..).map(|(s, _)| *s).next() else {
            return;
        };
        warn!(
            "Gap at {}..{} unresolved after {:?}; skipping",
            self.next_expected, next_buffered, waited
        );
        self.skipped.extend(self.next_expected..next_buffered);
        self.advance();
        self.gap_observed_at = None;
        self.refresh_gap_marker(now);
    }
}
