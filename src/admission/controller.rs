// Admission control
//
// A fixed number of sessions may stream at once. Requests beyond capacity
// wait in a strict FIFO queue; whenever a slot frees up, the queue head is
// promoted with a freshly generated session id inside the same critical
// section, so concurrent callers can never jointly over-admit.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::{StreamError, StreamResult};
use crate::pipeline::resources::ResourceGuard;
use crate::session::{SessionId, SessionRequest};

/// Recently closed ids kept to rule out reuse
const RECENT_ID_HISTORY: usize = 4096;

/// Promoted tickets remembered for `position` lookups
const PROMOTED_TICKET_HISTORY: usize = 1024;

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub max_sessions: usize,
    /// Estimated service time of one queue slot
    pub per_slot_wait_ms: u64,
    /// Requests beyond this many waiting are refused (0 = unbounded)
    pub max_queue_length: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            per_slot_wait_ms: 30_000,
            max_queue_length: 50,
        }
    }
}

/// Place in the admission queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTicket {
    pub ticket_id: String,
    /// 1-based FIFO position
    pub position: usize,
    pub estimated_wait_ms: u64,
}

/// Outcome of an admission request
#[derive(Debug)]
pub enum Admission {
    Admitted(SessionId),
    Queued {
        ticket: QueueTicket,
        /// Resolves with the session id once the request is promoted
        promoted: oneshot::Receiver<SessionId>,
    },
}

/// Current state of a queue ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting {
        position: usize,
        estimated_wait_ms: u64,
    },
    Promoted {
        session_id: SessionId,
    },
}

/// A queued request that has just been granted a slot
#[derive(Debug)]
pub struct Promotion {
    pub ticket_id: String,
    pub session_id: SessionId,
    pub request: SessionRequest,
    pub owner: Option<String>,
    pub notify: oneshot::Sender<SessionId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionStats {
    pub active_sessions: usize,
    pub max_sessions: usize,
    pub queue_length: usize,
}

#[derive(Debug)]
struct QueuedRequest {
    ticket_id: String,
    request: SessionRequest,
    owner: Option<String>,
    notify: oneshot::Sender<SessionId>,
}

#[derive(Debug, Default)]
struct AdmissionState {
    active: HashSet<SessionId>,
    queue: VecDeque<QueuedRequest>,
    recent_ids: VecDeque<SessionId>,
    recent_set: HashSet<SessionId>,
    promoted: HashMap<String, SessionId>,
    promoted_order: VecDeque<String>,
}

impl AdmissionState {
    fn fresh_id(&self) -> SessionId {
        loop {
            let id = SessionId::generate();
            if !self.active.contains(&id) && !self.recent_set.contains(&id) {
                return id;
            }
        }
    }

    fn remember_closed(&mut self, id: SessionId) {
        if self.recent_set.insert(id.clone()) {
            self.recent_ids.push_back(id);
        }
        while self.recent_ids.len() > RECENT_ID_HISTORY {
            if let Some(old) = self.recent_ids.pop_front() {
                self.recent_set.remove(&old);
            }
        }
    }

    fn remember_promoted(&mut self, ticket_id: String, id: SessionId) {
        self.promoted.insert(ticket_id.clone(), id);
        self.promoted_order.push_back(ticket_id);
        while self.promoted_order.len() > PROMOTED_TICKET_HISTORY {
            if let Some(old) = self.promoted_order.pop_front() {
                self.promoted.remove(&old);
            }
        }
    }
}

/// Enforces the concurrent session ceiling with FIFO queueing
pub struct AdmissionController {
    config: AdmissionConfig,
    resources: Arc<ResourceGuard>,
    state: Mutex<AdmissionState>,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig, resources: Arc<ResourceGuard>) -> Self {
        info!(
            "Admission controller initialized: {} sessions, {}ms per queue slot",
            config.max_sessions, config.per_slot_wait_ms
        );

        Self {
            config,
            resources,
            state: Mutex::new(AdmissionState::default()),
        }
    }

    /// Admit immediately when a slot is free and nobody is waiting, otherwise queue
    ///
    /// Fails with `SessionLimitReached` when the queue itself is full.
    pub async fn request(
        &self,
        request: SessionRequest,
        owner: Option<String>,
    ) -> StreamResult<Admission> {
        let mut state = self.state.lock().await;

        let has_capacity = state.active.len() < self.config.max_sessions;
        if state.queue.is_empty() && has_capacity && self.resources.has_headroom() {
            let id = state.fresh_id();
            state.active.insert(id.clone());
            debug!(session_id = %id, active = state.active.len(), "Session admitted");
            return Ok(Admission::Admitted(id));
        }

        if self.config.max_queue_length > 0 && state.queue.len() >= self.config.max_queue_length {
            warn!(
                "Session request refused: {} active, {} already queued",
                state.active.len(),
                state.queue.len()
            );
            return Err(StreamError::SessionLimitReached {
                max_sessions: self.config.max_sessions,
                queued: state.queue.len(),
            });
        }

        let position = state.queue.len() + 1;
        let ticket = QueueTicket {
            ticket_id: format!("ticket-{}", uuid::Uuid::new_v4()),
            position,
            estimated_wait_ms: self.estimated_wait(position),
        };
        let (notify, promoted) = oneshot::channel();
        state.queue.push_back(QueuedRequest {
            ticket_id: ticket.ticket_id.clone(),
            request,
            owner,
            notify,
        });

        info!(
            "Session request queued at position {} (active {}/{})",
            position,
            state.active.len(),
            self.config.max_sessions
        );

        Ok(Admission::Queued { ticket, promoted })
    }

    /// Free a slot and promote waiting requests into it
    pub async fn release(&self, id: &SessionId) -> Vec<Promotion> {
        let mut state = self.state.lock().await;
        if state.active.remove(id) {
            state.remember_closed(id.clone());
            debug!(session_id = %id, active = state.active.len(), "Session slot released");
        }
        self.promote_locked(&mut state)
    }

    /// Promote waiting requests if capacity or memory headroom has become available
    pub async fn promote_waiting(&self) -> Vec<Promotion> {
        let mut state = self.state.lock().await;
        self.promote_locked(&mut state)
    }

    fn promote_locked(&self, state: &mut AdmissionState) -> Vec<Promotion> {
        let mut promotions = Vec::new();

        while state.active.len() < self.config.max_sessions && self.resources.has_headroom() {
            let Some(entry) = state.queue.pop_front() else {
                break;
            };

            let id = state.fresh_id();
            state.active.insert(id.clone());
            state.remember_promoted(entry.ticket_id.clone(), id.clone());
            info!(session_id = %id, "Promoted queued request {}", entry.ticket_id);

            promotions.push(Promotion {
                ticket_id: entry.ticket_id,
                session_id: id,
                request: entry.request,
                owner: entry.owner,
                notify: entry.notify,
            });
        }

        promotions
    }

    /// Remove a queued request (e.g., its requester went away)
    pub async fn withdraw(&self, ticket_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let before = state.queue.len();
        state.queue.retain(|entry| entry.ticket_id != ticket_id);
        before != state.queue.len()
    }

    /// Remove every queued request owned by a disconnected socket
    pub async fn withdraw_owner(&self, owner: &str) -> usize {
        let mut state = self.state.lock().await;
        let before = state.queue.len();
        state
            .queue
            .retain(|entry| entry.owner.as_deref() != Some(owner));
        before - state.queue.len()
    }

    pub async fn queue_status(&self, ticket_id: &str) -> StreamResult<QueueStatus> {
        let state = self.state.lock().await;

        if let Some(index) = state.queue.iter().position(|e| e.ticket_id == ticket_id) {
            let position = index + 1;
            return Ok(QueueStatus::Waiting {
                position,
                estimated_wait_ms: self.estimated_wait(position),
            });
        }
        if let Some(id) = state.promoted.get(ticket_id) {
            return Ok(QueueStatus::Promoted {
                session_id: id.clone(),
            });
        }

        Err(StreamError::TicketNotFound(ticket_id.to_string()))
    }

    pub async fn stats(&self) -> AdmissionStats {
        let state = self.state.lock().await;
        AdmissionStats {
            active_sessions: state.active.len(),
            max_sessions: self.config.max_sessions,
            queue_length: state.queue.len(),
        }
    }

    fn estimated_wait(&self, position: usize) -> u64 {
        position as u64 * self.config.per_slot_wait_ms
    }
}
