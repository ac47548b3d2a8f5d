use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::{Language, SessionContext, SessionId, SessionRequest};
use super::stats::{ResumePoint, SessionSnapshot, TranscriptSegment};
use crate::audio::{AudioChunk, ChunkBuffer, ChunkBufferConfig, ChunkBufferStats, InsertOutcome};
use crate::error::{StreamError, StreamResult};
use crate::pipeline::collaborators::{Categorization, ReviewItem, Transcription};

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepting audio
    Active,
    /// Audio acceptance halted by the client
    Paused,
    /// No activity within the idle timeout or connection lost; recoverable
    Idle,
    /// Stream stopped, finalization in progress or awaiting retry
    Processing,
    /// Delivered to the review queue or cancelled
    Completed,
}

/// Which pipeline step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedStage {
    Transcription,
    Categorization,
    Handoff,
}

/// Post-stream progress through the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum PipelineStage {
    Streaming,
    Finalizing,
    Categorizing,
    HandingOff,
    Delivered,
    Cancelled,
    /// Recoverable: the transcript and any extracted data are retained
    Failed { failed: FailedStage, message: String },
}

impl PipelineStage {
    pub fn is_failed(&self) -> bool {
        matches!(self, PipelineStage::Failed { .. })
    }
}

/// Append-only transcript text; its length never decreases
#[derive(Debug, Clone, Default)]
pub struct TranscriptBuffer(String);

impl TranscriptBuffer {
    pub fn append(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.0.is_empty() {
            self.0.push(' ');
        }
        self.0.push_str(text);
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// State of one streaming dictation
#[derive(Debug)]
pub struct StreamSession {
    id: SessionId,
    user_id: String,
    context: SessionContext,
    language: Language,
    status: SessionStatus,
    stage: PipelineStage,
    context_locked: bool,
    transcript: TranscriptBuffer,
    segments: Vec<TranscriptSegment>,
    buffer: ChunkBuffer,
    socket_id: Option<String>,
    categorization: Option<Categorization>,
    review_id: Option<String>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    idle_since: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl StreamSession {
    pub fn new(
        id: SessionId,
        request: SessionRequest,
        buffer_config: ChunkBufferConfig,
        socket_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: request.user_id,
            context: request.context,
            language: request.language,
            status: SessionStatus::Active,
            stage: PipelineStage::Streaming,
            context_locked: false,
            transcript: TranscriptBuffer::default(),
            segments: Vec::new(),
            buffer: ChunkBuffer::new(buffer_config),
            socket_id,
            categorization: None,
            review_id: None,
            created_at: now,
            last_activity_at: now,
            idle_since: None,
            finished_at: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn stage(&self) -> &PipelineStage {
        &self.stage
    }

    pub fn is_context_locked(&self) -> bool {
        self.context_locked
    }

    pub fn transcript(&self) -> &str {
        self.transcript.as_str()
    }

    pub fn transcript_len(&self) -> usize {
        self.transcript.len()
    }

    pub fn segments(&self) -> &[TranscriptSegment] {
        &self.segments
    }

    pub fn buffer(&self) -> &ChunkBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut ChunkBuffer {
        &mut self.buffer
    }

    pub fn socket_id(&self) -> Option<&str> {
        self.socket_id.as_deref()
    }

    pub fn categorization(&self) -> Option<&Categorization> {
        self.categorization.as_ref()
    }

    pub fn review_id(&self) -> Option<&str> {
        self.review_id.as_deref()
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    pub fn idle_since(&self) -> Option<DateTime<Utc>> {
        self.idle_since
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Whether the session still holds an admission slot
    pub fn holds_slot(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Active | SessionStatus::Paused | SessionStatus::Idle
        )
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Buffer an incoming chunk; the first accepted chunk locks the context
    pub fn accept_chunk(&mut self, chunk: AudioChunk) -> StreamResult<InsertOutcome> {
        self.require(&[SessionStatus::Active], "accept audio")?;

        let outcome = self.buffer.insert(chunk)?;
        self.context_locked = true;
        self.touch();
        Ok(outcome)
    }

    /// Replace the context; fails once audio streaming has started
    pub fn update_context(&mut self, context: SessionContext) -> StreamResult<()> {
        if self.context_locked {
            return Err(StreamError::ContextImmutable);
        }
        self.require(&[SessionStatus::Active, SessionStatus::Paused], "change context")?;

        self.context = context;
        self.touch();
        Ok(())
    }

    pub fn pause(&mut self) -> StreamResult<()> {
        self.require(&[SessionStatus::Active], "pause")?;
        self.status = SessionStatus::Paused;
        self.touch();
        Ok(())
    }

    pub fn resume(&mut self) -> StreamResult<()> {
        self.require(&[SessionStatus::Paused], "resume")?;
        self.status = SessionStatus::Active;
        self.touch();
        Ok(())
    }

    /// Connection lost or idle timeout: keep everything for recovery
    pub fn mark_idle(&mut self, now: DateTime<Utc>) -> StreamResult<()> {
        self.require(&[SessionStatus::Active, SessionStatus::Paused], "go idle")?;
        self.status = SessionStatus::Idle;
        self.idle_since = Some(now);
        self.socket_id = None;
        Ok(())
    }

    /// Reattach a client to an idle (or still live) session
    pub fn reconnect(&mut self, socket_id: Option<String>) -> StreamResult<ResumePoint> {
        self.require(
            &[SessionStatus::Active, SessionStatus::Paused, SessionStatus::Idle],
            "reconnect",
        )?;
        if self.status == SessionStatus::Idle {
            self.status = SessionStatus::Active;
        }
        self.idle_since = None;
        self.socket_id = socket_id;
        self.touch();

        Ok(ResumePoint {
            session_id: self.id.clone(),
            next_sequence: self.buffer.next_expected(),
            missing: self.buffer.check_for_gaps(),
            transcript_len: self.transcript.len(),
        })
    }

    /// Leave live streaming; finalization follows
    pub fn begin_processing(&mut self) -> StreamResult<()> {
        self.require(
            &[SessionStatus::Active, SessionStatus::Paused, SessionStatus::Idle],
            "stop",
        )?;
        self.status = SessionStatus::Processing;
        self.stage = PipelineStage::Finalizing;
        self.idle_since = None;
        self.touch();
        Ok(())
    }

    pub fn set_stage(&mut self, stage: PipelineStage) {
        self.stage = stage;
        self.touch();
    }

    pub fn fail(&mut self, failed: FailedStage, message: impl Into<String>) {
        self.set_stage(PipelineStage::Failed {
            failed,
            message: message.into(),
        });
    }

    pub fn store_categorization(&mut self, categorization: Categorization) {
        self.categorization = Some(categorization);
        self.touch();
    }

    /// Delivered (or nothing to deliver)
    pub fn complete(&mut self, review_id: Option<String>) {
        self.review_id = review_id;
        self.stage = PipelineStage::Delivered;
        self.status = SessionStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    /// Discard pending categorization; the transcript stays retrievable
    pub fn cancel(&mut self) -> StreamResult<()> {
        if self.status == SessionStatus::Completed {
            return Err(StreamError::InvalidState {
                id: self.id.clone(),
                action: "cancel",
                status: self.status,
            });
        }
        self.status = SessionStatus::Completed;
        self.stage = PipelineStage::Cancelled;
        self.idle_since = None;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.stage == PipelineStage::Cancelled
    }

    /// Fold a successful transcription into the session
    ///
    /// Marks the batch processed and appends its text. Returns the new
    /// segments; an already-processed batch yields none and appends nothing.
    pub fn apply_transcription(
        &mut self,
        sequence_numbers: &[u64],
        transcription: &Transcription,
        uncertainty_threshold: f32,
    ) -> Vec<TranscriptSegment> {
        let marked =
            self.buffer
                .mark_processed(sequence_numbers, &transcription.text, transcription.confidence);
        if marked == 0 {
            return Vec::new();
        }

        self.transcript.append(&transcription.text);
        self.touch();

        let sequence_start = sequence_numbers.iter().copied().min().unwrap_or_default();
        let timestamp = Utc::now();
        let segments: Vec<TranscriptSegment> = if transcription.segments.is_empty() {
            if transcription.text.trim().is_empty() {
                Vec::new()
            } else {
                vec![TranscriptSegment {
                    sequence_start,
                    text: transcription.text.trim().to_string(),
                    confidence: transcription.confidence,
                    is_uncertain: transcription.confidence < uncertainty_threshold,
                    start_ms: None,
                    end_ms: None,
                    timestamp,
                }]
            }
        } else {
            transcription
                .segments
                .iter()
                .map(|segment| TranscriptSegment {
                    sequence_start,
                    text: segment.text.trim().to_string(),
                    confidence: segment.confidence,
                    is_uncertain: segment.confidence < uncertainty_threshold,
                    start_ms: segment.start_ms,
                    end_ms: segment.end_ms,
                    timestamp,
                })
                .collect()
        };

        self.segments.extend(segments.iter().cloned());
        segments
    }

    /// Arithmetic mean of segment confidences
    pub fn aggregate_confidence(&self) -> Option<f32> {
        if self.segments.is_empty() {
            return None;
        }
        let sum: f32 = self.segments.iter().map(|s| s.confidence).sum();
        Some(sum / self.segments.len() as f32)
    }

    /// Build the review-queue payload from retained state
    ///
    /// Context fields always come from the locked session context.
    pub fn review_item(&self) -> Option<ReviewItem> {
        let categorization = self.categorization.as_ref()?;
        Some(ReviewItem {
            session_id: self.id.clone(),
            user_id: self.user_id.clone(),
            context_type: self.context.context_type(),
            patient_id: self.context.patient_id().map(str::to_string),
            language: self.language,
            transcript: self.transcript.as_str().to_string(),
            categories: categorization.categories.clone(),
            extracted_fields: categorization.extracted_fields.clone(),
            confidence: categorization.confidence,
            created_at: Utc::now(),
        })
    }

    /// Release buffered audio and return final buffer statistics
    pub fn release_buffer(&mut self) -> ChunkBufferStats {
        self.buffer.clear()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            user_id: self.user_id.clone(),
            context_type: self.context.context_type(),
            patient_id: self.context.patient_id().map(str::to_string),
            language: self.language,
            status: self.status,
            stage: self.stage.clone(),
            context_locked: self.context_locked,
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
            transcript_len: self.transcript.len(),
            confidence: self.aggregate_confidence(),
            next_sequence: self.buffer.next_expected(),
            pending_chunks: self.buffer.all_unprocessed_chunks().len(),
            missing_chunks: self.buffer.check_for_gaps(),
            buffered_bytes: self.buffer.buffered_bytes(),
            review_id: self.review_id.clone(),
        }
    }

    fn require(&self, allowed: &[SessionStatus], action: &'static str) -> StreamResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(StreamError::InvalidState {
                id: self.id.clone(),
                action,
                status: self.status,
            })
        }
    }
}
