// Per-session processing pipeline
//
// ingest -> transcribe -> finalize -> categorize -> hand off
//
// Each session gets its own worker task that is the only consumer of ready
// chunks, so batches are transcribed strictly in sequence order. Collaborator
// calls always run outside the session lock. Every step records its outcome
// on the session as a `PipelineStage`; a failed step leaves the transcript
// and any extracted data in place and can be retried from where it stopped.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use super::collaborators::{Categorizer, ReviewStore, Transcriber, Transcription};
use super::events::StreamEvent;
use super::resources::ResourceGuard;
use crate::error::{StreamError, StreamResult};
use crate::session::{
    FailedStage, Language, PipelineStage, SessionHandle, SessionId, SessionStatus, StreamSession,
};

/// Retry behaviour for transcription calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Tunables for the pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Maximum chunks per transcription call
    pub ready_batch_size: usize,
    /// Segments below this confidence are flagged uncertain
    pub uncertainty_threshold: f32,
    pub transcription_timeout: Duration,
    pub categorization_timeout: Duration,
    pub retry: RetryPolicy,
    /// Keep processed payloads for `combined_audio`
    pub retain_processed_audio: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            ready_batch_size: 32,
            uncertainty_threshold: 0.7,
            transcription_timeout: Duration::from_secs(120),
            categorization_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            retain_processed_audio: true,
        }
    }
}

/// Outcome of a finalization attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeReport {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub stage: PipelineStage,
    pub transcript: String,
    pub review_id: Option<String>,
}

impl FinalizeReport {
    pub fn is_delivered(&self) -> bool {
        self.stage == PipelineStage::Delivered
    }
}

/// Drives transcription, categorization and review handoff for sessions
pub struct Pipeline {
    transcriber: Arc<dyn Transcriber>,
    categorizer: Arc<dyn Categorizer>,
    store: Arc<dyn ReviewStore>,
    resources: Arc<ResourceGuard>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        categorizer: Arc<dyn Categorizer>,
        store: Arc<dyn ReviewStore>,
        resources: Arc<ResourceGuard>,
        settings: PipelineSettings,
    ) -> Self {
        info!(
            "Pipeline initialized with transcriber '{}' (batch size {})",
            transcriber.name(),
            settings.ready_batch_size
        );

        Self {
            transcriber,
            categorizer,
            store,
            resources,
            settings,
        }
    }

    /// Spawn the transcription worker for a session
    ///
    /// The worker drains ready chunks every time it is woken and exits once
    /// the session has left live streaming.
    pub fn spawn_worker(self: &Arc<Self>, handle: Arc<SessionHandle>) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);

        tokio::spawn(async move {
            info!(session_id = %handle.id(), "Transcription worker started");

            loop {
                handle.wait_for_work().await;

                if let Err(e) = pipeline.transcribe_ready(&handle).await {
                    warn!(session_id = %handle.id(), "Transcription deferred: {}", e);
                }

                let status = handle.lock().await.status();
                if matches!(status, SessionStatus::Processing | SessionStatus::Completed) {
                    break;
                }
            }

            info!(session_id = %handle.id(), "Transcription worker stopped");
        })
    }

    /// Transcribe every contiguous ready batch, in sequence order
    ///
    /// Returns the number of batches transcribed. On failure the batch stays
    /// unprocessed and the transcript is left exactly as it was.
    pub async fn transcribe_ready(&self, handle: &SessionHandle) -> StreamResult<usize> {
        let mut batches = 0;

        loop {
            let (sequence_numbers, audio, language) = {
                let mut session = handle.lock().await;
                if session.is_cancelled() {
                    return Ok(batches);
                }
                let ready = session
                    .buffer_mut()
                    .ready_chunks(self.settings.ready_batch_size.max(1));
                if ready.is_empty() {
                    return Ok(batches);
                }

                let sequence_numbers: Vec<u64> = ready.iter().map(|c| c.sequence_number).collect();
                let mut audio = Vec::with_capacity(ready.iter().map(|c| c.len()).sum());
                for chunk in &ready {
                    audio.extend_from_slice(&chunk.payload);
                }
                (sequence_numbers, audio, session.language())
            };

            let transcription = match self.transcribe_with_retry(handle.id(), &audio, language).await {
                Ok(t) => t,
                Err(e) => {
                    handle.emit(StreamEvent::error(&e));
                    return Err(e);
                }
            };

            let segments = {
                let mut session = handle.lock().await;
                let segments = session.apply_transcription(
                    &sequence_numbers,
                    &transcription,
                    self.settings.uncertainty_threshold,
                );
                if !self.settings.retain_processed_audio {
                    let freed = session.buffer_mut().dispose_processed();
                    self.resources.release(freed);
                }
                segments
            };

            if !segments.is_empty() {
                handle.emit(StreamEvent::Transcription {
                    text: transcription.text.trim().to_string(),
                    confidence: transcription.confidence,
                    is_final: false,
                    segments,
                });
            }
            batches += 1;
        }
    }

    async fn transcribe_with_retry(
        &self,
        session_id: &SessionId,
        audio: &[u8],
        language: Language,
    ) -> StreamResult<Transcription> {
        let mut attempt = 1;

        loop {
            let failure = match timeout(
                self.settings.transcription_timeout,
                self.transcriber.transcribe(audio, language),
            )
            .await
            {
                Ok(Ok(transcription)) => return Ok(transcription),
                Ok(Err(e)) => format!("{:#}", e),
                Err(_) => format!(
                    "timed out after {}s",
                    self.settings.transcription_timeout.as_secs()
                ),
            };

            warn!(
                session_id = %session_id,
                "Transcription attempt {}/{} failed: {}",
                attempt, self.settings.retry.max_attempts, failure
            );

            if !self.settings.retry.should_retry(attempt) {
                return Err(StreamError::Transcription(failure));
            }
            sleep(self.settings.retry.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }

    /// Run (or resume) finalization: drain audio, categorize, hand off
    ///
    /// The session must already be out of live streaming. Steps completed by
    /// an earlier attempt are not repeated.
    pub async fn finalize(&self, handle: &SessionHandle) -> FinalizeReport {
        handle.finish_worker().await;

        let needs_transcript = {
            let mut session = handle.lock().await;
            if session.is_cancelled() || session.stage() == &PipelineStage::Delivered {
                return Self::report(&session);
            }
            let needs_transcript = session.categorization().is_none();
            if needs_transcript {
                session.set_stage(PipelineStage::Finalizing);
                session.buffer_mut().force_skip_gaps();
            }
            needs_transcript
        };

        if needs_transcript {
            if let Err(e) = self.transcribe_ready(handle).await {
                let mut session = handle.lock().await;
                session.fail(FailedStage::Transcription, e.to_string());
                error!(session_id = %handle.id(), "Finalization stopped at transcription: {}", e);
                return Self::report(&session);
            }

            let (transcript, confidence) = {
                let mut session = handle.lock().await;
                if session.buffer().has_unprocessed() {
                    session.fail(
                        FailedStage::Transcription,
                        "buffered audio could not be transcribed",
                    );
                    return Self::report(&session);
                }
                if session.transcript().is_empty() {
                    info!(session_id = %handle.id(), "Session ended without speech; nothing to review");
                    session.complete(None);
                    handle.emit(StreamEvent::Complete {
                        transcript: String::new(),
                        session_id: handle.id().clone(),
                    });
                    return Self::report(&session);
                }
                (
                    session.transcript().to_string(),
                    session.aggregate_confidence().unwrap_or_default(),
                )
            };

            handle.emit(StreamEvent::Transcription {
                text: transcript.clone(),
                confidence,
                is_final: true,
                segments: Vec::new(),
            });
            handle.emit(StreamEvent::Complete {
                transcript,
                session_id: handle.id().clone(),
            });

            if let Err(report) = self.categorize(handle).await {
                return report;
            }
        }

        self.hand_off(handle).await
    }

    async fn categorize(&self, handle: &SessionHandle) -> Result<(), FinalizeReport> {
        let (text, language) = {
            let mut session = handle.lock().await;
            if session.is_cancelled() {
                return Err(Self::report(&session));
            }
            session.set_stage(PipelineStage::Categorizing);
            (session.transcript().to_string(), session.language())
        };

        handle.emit(StreamEvent::CategorizationStarted {
            session_id: handle.id().clone(),
        });

        let result = match timeout(
            self.settings.categorization_timeout,
            self.categorizer.categorize(&text, language),
        )
        .await
        {
            Ok(Ok(categorization)) => Ok(categorization),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(_) => Err(format!(
                "timed out after {}s",
                self.settings.categorization_timeout.as_secs()
            )),
        };

        let mut session = handle.lock().await;
        match result {
            Ok(categorization) => {
                if session.is_cancelled() {
                    return Err(Self::report(&session));
                }
                info!(
                    session_id = %handle.id(),
                    "Categorized transcript into {} categories",
                    categorization.categories.len()
                );
                session.store_categorization(categorization);
                Ok(())
            }
            Err(message) => {
                session.fail(FailedStage::Categorization, message.clone());
                let err = StreamError::Categorization(message);
                error!(session_id = %handle.id(), "{}", err);
                handle.emit(StreamEvent::categorization_error(&err));
                Err(Self::report(&session))
            }
        }
    }

    async fn hand_off(&self, handle: &SessionHandle) -> FinalizeReport {
        let item = {
            let mut session = handle.lock().await;
            if session.is_cancelled() {
                return Self::report(&session);
            }
            let Some(item) = session.review_item() else {
                session.fail(FailedStage::Categorization, "no categorization to hand off");
                return Self::report(&session);
            };
            session.set_stage(PipelineStage::HandingOff);
            item
        };

        let result = self.store.create_review_item(&item).await;

        let mut session = handle.lock().await;
        match result {
            Ok(review_id) => {
                info!(session_id = %handle.id(), "Review item {} created", review_id);
                session.complete(Some(review_id.clone()));
                handle.emit(StreamEvent::CategorizationComplete {
                    review_id,
                    categories: item.categories,
                });
            }
            Err(e) => {
                let message = format!("{:#}", e);
                session.fail(FailedStage::Handoff, message.clone());
                let err = StreamError::Handoff(message);
                error!(session_id = %handle.id(), "{}", err);
                handle.emit(StreamEvent::categorization_error(&err));
            }
        }
        Self::report(&session)
    }

    fn report(session: &StreamSession) -> FinalizeReport {
        FinalizeReport {
            session_id: session.id().clone(),
            status: session.status(),
            stage: session.stage().clone(),
            transcript: session.transcript().to_string(),
            review_id: session.review_id().map(str::to_string),
        }
    }
}
