// Streaming service facade
//
// Every transport (HTTP, NATS, tests) goes through `StreamService`. It owns
// the session registry, the admission controller, the resource guard and the
// pipeline, and keeps slot accounting consistent between them: a session
// holds its admission slot while active, paused or idle, and gives it back
// when it stops, is cancelled or is purged. Each release promotes queued
// requests into live sessions before returning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::admission::{
    Admission, AdmissionConfig, AdmissionController, Promotion, QueueStatus, QueueTicket,
};
use crate::audio::{AudioChunk, ChunkBufferConfig, ChunkBufferStats, InsertOutcome};
use crate::config::{Config, StreamingConfig};
use crate::error::{ErrorCode, StreamError, StreamResult};
use crate::pipeline::{
    Categorizer, FinalizeReport, Pipeline, PipelineSettings, ResourceGuard, ReviewStore,
    StreamEvent, Transcriber,
};
use crate::session::{
    ContextUpdate, PipelineStage, ResumePoint, SessionConfig, SessionContext, SessionHandle,
    SessionId, SessionRegistry, SessionRequest, SessionSnapshot, SessionStatus, StreamSession,
    TranscriptSegment,
};

/// Result of `start_stream`
#[derive(Debug)]
pub enum StartOutcome {
    Started(SessionId),
    Queued {
        ticket: QueueTicket,
        /// Resolves with the session id once the request is promoted
        promoted: oneshot::Receiver<SessionId>,
    },
}

/// Accumulated transcript of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptView {
    pub session_id: SessionId,
    pub transcript: String,
    pub confidence: Option<f32>,
    pub segments: Vec<TranscriptSegment>,
    pub stage: PipelineStage,
}

/// Service-wide counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    pub active_sessions: usize,
    pub max_sessions: usize,
    pub queue_length: usize,
    pub tracked_sessions: usize,
    pub idle_timeout_ms: u64,
    pub buffered_bytes: u64,
    pub max_buffered_bytes: u64,
}

/// What a single reaper sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapReport {
    /// Sessions that went idle on this sweep
    pub timed_out: Vec<SessionId>,
    /// Idle sessions past the recovery window that were finalized
    pub finalized: Vec<SessionId>,
    /// Sessions removed from the registry
    pub purged: Vec<SessionId>,
    /// Finalized sessions kept because a pipeline step failed
    pub retained: Vec<SessionId>,
    /// Queued requests promoted into live sessions
    pub promoted: usize,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.timed_out.is_empty()
            && self.finalized.is_empty()
            && self.purged.is_empty()
            && self.retained.is_empty()
            && self.promoted == 0
    }
}

enum SweepAction {
    Wake,
    TimedOut(Option<String>),
    Expire,
    Purge,
}

pub struct StreamService {
    streaming: StreamingConfig,
    registry: SessionRegistry,
    admission: AdmissionController,
    resources: Arc<ResourceGuard>,
    pipeline: Arc<Pipeline>,
}

impl StreamService {
    pub fn new(
        config: &Config,
        transcriber: Arc<dyn Transcriber>,
        categorizer: Arc<dyn Categorizer>,
        store: Arc<dyn ReviewStore>,
    ) -> Self {
        let streaming = config.streaming.clone();

        let resources = Arc::new(ResourceGuard::new(
            streaming.max_buffered_bytes,
            streaming.max_session_buffer_bytes,
        ));

        let admission = AdmissionController::new(
            AdmissionConfig {
                max_sessions: streaming.max_sessions,
                per_slot_wait_ms: streaming.per_slot_wait_ms,
                max_queue_length: streaming.max_queue_length,
            },
            Arc::clone(&resources),
        );

        let settings = PipelineSettings {
            ready_batch_size: streaming.ready_batch_size,
            uncertainty_threshold: streaming.uncertainty_threshold,
            transcription_timeout: Duration::from_millis(config.transcription.timeout_ms),
            categorization_timeout: Duration::from_millis(config.categorization.timeout_ms),
            retry: config.transcription.retry.clone(),
            retain_processed_audio: streaming.retain_processed_audio,
        };

        let pipeline = Arc::new(Pipeline::new(
            transcriber,
            categorizer,
            store,
            Arc::clone(&resources),
            settings,
        ));

        Self {
            streaming,
            registry: SessionRegistry::new(),
            admission,
            resources,
            pipeline,
        }
    }

    /// Validate a start request and admit or queue it
    pub async fn start_stream(
        &self,
        config: SessionConfig,
        socket_id: Option<String>,
    ) -> StreamResult<StartOutcome> {
        let request = config.validate()?;

        match self.admission.request(request.clone(), socket_id.clone()).await? {
            Admission::Admitted(id) => {
                self.open_session(id.clone(), request, socket_id).await;
                Ok(StartOutcome::Started(id))
            }
            Admission::Queued { ticket, promoted } => Ok(StartOutcome::Queued { ticket, promoted }),
        }
    }

    async fn open_session(&self, id: SessionId, request: SessionRequest, socket_id: Option<String>) {
        let buffer_config = ChunkBufferConfig {
            max_reorder_window: self.streaming.max_reorder_window,
            gap_skip_timeout: self.streaming.gap_skip_timeout(),
        };

        let session = StreamSession::new(id.clone(), request, buffer_config, socket_id.clone());
        let handle = Arc::new(SessionHandle::new(session, self.streaming.event_capacity));

        let worker = self.pipeline.spawn_worker(Arc::clone(&handle));
        handle.set_worker(worker).await;

        self.registry.insert(Arc::clone(&handle)).await;
        if let Some(socket_id) = socket_id.as_deref() {
            self.registry.bind_socket(socket_id, &id).await;
        }

        info!(session_id = %id, "Stream session started");
        handle.emit(StreamEvent::Started { session_id: id });
    }

    async fn open_promotions(&self, promotions: Vec<Promotion>) -> usize {
        let count = promotions.len();
        for promotion in promotions {
            let id = promotion.session_id.clone();
            self.open_session(id.clone(), promotion.request, promotion.owner)
                .await;
            if promotion.notify.send(id.clone()).is_err() {
                debug!(session_id = %id, "Ticket {} holder is not waiting", promotion.ticket_id);
            }
        }
        count
    }

    async fn release_slot(&self, id: &SessionId) -> usize {
        let promotions = self.admission.release(id).await;
        self.open_promotions(promotions).await
    }

    /// Drop buffered audio and give the bytes back to the resource guard
    async fn release_audio(&self, handle: &SessionHandle) -> ChunkBufferStats {
        let stats = {
            let mut session = handle.lock().await;
            let freed = session.buffer().buffered_bytes();
            let stats = session.release_buffer();
            self.resources.release(freed);
            stats
        };
        let promotions = self.admission.promote_waiting().await;
        self.open_promotions(promotions).await;
        stats
    }

    /// Buffer one audio chunk
    pub async fn add_chunk(
        &self,
        id: &SessionId,
        sequence: i64,
        payload: Vec<u8>,
    ) -> StreamResult<InsertOutcome> {
        let handle = self.registry.get(id).await?;
        let chunk = AudioChunk::new(sequence, payload)?;
        let bytes = chunk.len() as u64;

        let outcome = {
            let mut session = handle.lock().await;
            self.resources
                .check_session(session.buffer().unprocessed_bytes(), bytes)?;
            let outcome = session.accept_chunk(chunk)?;
            if outcome == InsertOutcome::Inserted {
                self.resources.reserve(bytes);
            }
            outcome
        };

        match outcome {
            InsertOutcome::Inserted => handle.wake_worker(),
            other => debug!(session_id = %id, sequence, "Chunk not stored: {:?}", other),
        }
        Ok(outcome)
    }

    pub async fn update_context(&self, id: &SessionId, update: ContextUpdate) -> StreamResult<()> {
        let context = SessionContext::try_from(update)?;
        let handle = self.registry.get(id).await?;
        let mut session = handle.lock().await;
        session.update_context(context)?;
        info!(session_id = %id, "Session context changed to {:?}", session.context().context_type());
        Ok(())
    }

    pub async fn pause(&self, id: &SessionId) -> StreamResult<()> {
        let handle = self.registry.get(id).await?;
        handle.lock().await.pause()?;
        info!(session_id = %id, "Stream paused");
        handle.emit(StreamEvent::Paused {
            session_id: id.clone(),
        });
        Ok(())
    }

    pub async fn resume(&self, id: &SessionId) -> StreamResult<()> {
        let handle = self.registry.get(id).await?;
        handle.lock().await.resume()?;
        info!(session_id = %id, "Stream resumed");
        handle.emit(StreamEvent::Resumed {
            session_id: id.clone(),
        });
        handle.wake_worker();
        Ok(())
    }

    /// End streaming, free the slot and run finalization
    pub async fn stop(&self, id: &SessionId) -> StreamResult<FinalizeReport> {
        let handle = self.registry.get(id).await?;
        handle.lock().await.begin_processing()?;
        info!(session_id = %id, "Stream stopped; finalizing");

        self.release_slot(id).await;
        Ok(self.finalize(&handle).await)
    }

    async fn finalize(&self, handle: &SessionHandle) -> FinalizeReport {
        let report = self.pipeline.finalize(handle).await;
        if report.is_delivered() {
            self.release_audio(handle).await;
        }
        report
    }

    /// Resume a failed finalization at the step that failed
    pub async fn retry_finalization(&self, id: &SessionId) -> StreamResult<FinalizeReport> {
        let handle = self.registry.get(id).await?;
        {
            let mut session = handle.lock().await;
            if session.status() != SessionStatus::Processing || !session.stage().is_failed() {
                return Err(StreamError::InvalidState {
                    id: id.clone(),
                    action: "retry",
                    status: session.status(),
                });
            }
            // Claimed under the same guard so a concurrent retry is rejected
            session.set_stage(PipelineStage::Finalizing);
        }

        info!(session_id = %id, "Retrying finalization");
        Ok(self.finalize(&handle).await)
    }

    /// Abandon the session; its transcript stays readable until purged
    pub async fn cancel(&self, id: &SessionId) -> StreamResult<()> {
        let handle = self.registry.get(id).await?;
        let held_slot = {
            let mut session = handle.lock().await;
            let held = session.holds_slot();
            session.cancel()?;
            held
        };
        info!(session_id = %id, "Stream cancelled");

        handle.stop_worker().await;
        if held_slot {
            self.release_slot(id).await;
        }
        self.release_audio(&handle).await;
        Ok(())
    }

    /// Remove a session entirely and return its final buffer statistics
    pub async fn close_session(&self, id: &SessionId) -> StreamResult<ChunkBufferStats> {
        let handle = self
            .registry
            .remove(id)
            .await
            .ok_or_else(|| StreamError::SessionNotFound(id.clone()))?;
        Ok(self.purge(&handle).await)
    }

    async fn purge(&self, handle: &SessionHandle) -> ChunkBufferStats {
        handle.stop_worker().await;

        let held_slot = handle.lock().await.holds_slot();
        if held_slot {
            self.release_slot(handle.id()).await;
        }
        let stats = self.release_audio(handle).await;

        info!(
            session_id = %handle.id(),
            "Session closed: {} chunks ({} bytes), {} processed, {} skipped, {} late",
            stats.total_chunks,
            stats.total_bytes,
            stats.processed_chunks,
            stats.skipped_chunks,
            stats.late_chunks
        );
        stats
    }

    /// Connection lost: keep the session for recovery and drop queued requests
    pub async fn handle_disconnect(&self, socket_id: &str) -> Option<SessionId> {
        let withdrawn = self.admission.withdraw_owner(socket_id).await;
        if withdrawn > 0 {
            info!("Withdrew {} queued request(s) for disconnected socket", withdrawn);
        }

        let id = self.registry.unbind_socket(socket_id).await?;
        let handle = self.registry.get(&id).await.ok()?;
        let mut session = handle.lock().await;
        match session.mark_idle(Utc::now()) {
            Ok(()) => info!(session_id = %id, "Client disconnected; session idle"),
            Err(e) => debug!(session_id = %id, "Disconnect left session unchanged: {}", e),
        }
        Some(id)
    }

    /// Reattach a client and tell it where to resume
    pub async fn reconnect(
        &self,
        id: &SessionId,
        socket_id: Option<String>,
    ) -> StreamResult<ResumePoint> {
        let handle = self.registry.get(id).await?;
        let resume = handle.lock().await.reconnect(socket_id.clone())?;
        if let Some(socket_id) = socket_id.as_deref() {
            self.registry.bind_socket(socket_id, id).await;
        }

        info!(
            session_id = %id,
            "Client reconnected; resuming at sequence {} ({} missing)",
            resume.next_sequence,
            resume.missing.len()
        );
        handle.wake_worker();
        Ok(resume)
    }

    pub async fn ready_chunks(&self, id: &SessionId, max_count: usize) -> StreamResult<Vec<AudioChunk>> {
        let handle = self.registry.get(id).await?;
        let mut session = handle.lock().await;
        Ok(session.buffer_mut().ready_chunks(max_count))
    }

    pub async fn check_for_gaps(&self, id: &SessionId) -> StreamResult<Vec<u64>> {
        let handle = self.registry.get(id).await?;
        let session = handle.lock().await;
        Ok(session.buffer().check_for_gaps())
    }

    pub async fn combined_audio(&self, id: &SessionId) -> StreamResult<Vec<u8>> {
        let handle = self.registry.get(id).await?;
        let session = handle.lock().await;
        Ok(session.buffer().combined_audio())
    }

    pub async fn transcript(&self, id: &SessionId) -> StreamResult<TranscriptView> {
        let handle = self.registry.get(id).await?;
        let session = handle.lock().await;
        Ok(TranscriptView {
            session_id: id.clone(),
            transcript: session.transcript().to_string(),
            confidence: session.aggregate_confidence(),
            segments: session.segments().to_vec(),
            stage: session.stage().clone(),
        })
    }

    pub async fn snapshot(&self, id: &SessionId) -> StreamResult<SessionSnapshot> {
        let handle = self.registry.get(id).await?;
        let snapshot = handle.lock().await.snapshot();
        Ok(snapshot)
    }

    pub async fn subscribe(&self, id: &SessionId) -> StreamResult<broadcast::Receiver<StreamEvent>> {
        let handle = self.registry.get(id).await?;
        Ok(handle.subscribe())
    }

    pub async fn session_for_socket(&self, socket_id: &str) -> Option<SessionId> {
        self.registry.session_for_socket(socket_id).await
    }

    pub async fn queue_status(&self, ticket_id: &str) -> StreamResult<QueueStatus> {
        self.admission.queue_status(ticket_id).await
    }

    pub async fn withdraw(&self, ticket_id: &str) -> StreamResult<()> {
        if self.admission.withdraw(ticket_id).await {
            info!("Queued request {} withdrawn", ticket_id);
            Ok(())
        } else {
            Err(StreamError::TicketNotFound(ticket_id.to_string()))
        }
    }

    pub async fn stats(&self) -> ServiceStats {
        let admission = self.admission.stats().await;
        ServiceStats {
            active_sessions: admission.active_sessions,
            max_sessions: admission.max_sessions,
            queue_length: admission.queue_length,
            tracked_sessions: self.registry.len().await,
            idle_timeout_ms: self.streaming.idle_timeout_ms,
            buffered_bytes: self.resources.buffered_bytes(),
            max_buffered_bytes: self.resources.max_buffered_bytes(),
        }
    }

    /// One reaper pass over every session
    pub async fn sweep(&self, now: DateTime<Utc>) -> ReapReport {
        let idle_timeout = self.streaming.idle_timeout();
        let recovery_window = self.streaming.recovery_window();
        let mut report = ReapReport::default();

        for handle in self.registry.all().await {
            let action = {
                let mut session = handle.lock().await;
                match session.status() {
                    SessionStatus::Active | SessionStatus::Paused => {
                        if elapsed(now, session.last_activity_at()) > idle_timeout {
                            let socket_id = session.socket_id().map(str::to_string);
                            match session.mark_idle(now) {
                                Ok(()) => Some(SweepAction::TimedOut(socket_id)),
                                Err(e) => {
                                    warn!(session_id = %handle.id(), "Idle transition failed: {}", e);
                                    None
                                }
                            }
                        } else if session.buffer().has_unprocessed() {
                            Some(SweepAction::Wake)
                        } else {
                            None
                        }
                    }
                    SessionStatus::Idle => {
                        let since = session.idle_since().unwrap_or(session.last_activity_at());
                        if elapsed(now, since) > recovery_window {
                            match session.begin_processing() {
                                Ok(()) => Some(SweepAction::Expire),
                                Err(e) => {
                                    warn!(session_id = %handle.id(), "Idle expiry failed: {}", e);
                                    None
                                }
                            }
                        } else {
                            None
                        }
                    }
                    SessionStatus::Completed => {
                        let finished = session.finished_at().unwrap_or(session.last_activity_at());
                        (elapsed(now, finished) > recovery_window).then_some(SweepAction::Purge)
                    }
                    SessionStatus::Processing => None,
                }
            };

            match action {
                Some(SweepAction::Wake) => handle.wake_worker(),
                Some(SweepAction::TimedOut(socket_id)) => {
                    if let Some(socket_id) = socket_id.as_deref() {
                        self.registry.unbind_socket(socket_id).await;
                    }
                    info!(session_id = %handle.id(), "Session idle for over {}ms", idle_timeout.as_millis());
                    handle.emit(StreamEvent::Error {
                        code: ErrorCode::SessionTimeout,
                        message: StreamError::Timeout(handle.id().clone()).to_string(),
                    });
                    report.timed_out.push(handle.id().clone());
                }
                Some(SweepAction::Expire) => {
                    info!(session_id = %handle.id(), "Recovery window elapsed; finalizing idle session");
                    report.promoted += self.release_slot(handle.id()).await;
                    let outcome = self.finalize(&handle).await;
                    report.finalized.push(handle.id().clone());

                    if outcome.is_delivered() {
                        self.registry.remove(handle.id()).await;
                        self.purge(&handle).await;
                        report.purged.push(handle.id().clone());
                    } else {
                        warn!(
                            session_id = %handle.id(),
                            "Idle session retained after failed finalization: {:?}",
                            outcome.stage
                        );
                        report.retained.push(handle.id().clone());
                    }
                }
                Some(SweepAction::Purge) => {
                    self.registry.remove(handle.id()).await;
                    self.purge(&handle).await;
                    report.purged.push(handle.id().clone());
                }
                None => {}
            }
        }

        let promotions = self.admission.promote_waiting().await;
        report.promoted += self.open_promotions(promotions).await;

        if !report.is_empty() {
            info!(
                "Reaper sweep: {} timed out, {} finalized, {} purged, {} retained, {} promoted",
                report.timed_out.len(),
                report.finalized.len(),
                report.purged.len(),
                report.retained.len(),
                report.promoted
            );
        }
        report
    }
}

fn elapsed(now: DateTime<Utc>, since: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}
