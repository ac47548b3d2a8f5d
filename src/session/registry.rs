use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, MutexGuard, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::config::SessionId;
use super::session::StreamSession;
use crate::error::{StreamError, StreamResult};
use crate::pipeline::events::StreamEvent;

/// A live session plus its event channel and worker wake-up signal
pub struct SessionHandle {
    id: SessionId,

    /// Session state; same-session chunk inserts and marks serialize here
    state: Mutex<StreamSession>,

    /// Outbound events for this session
    events: broadcast::Sender<StreamEvent>,

    /// Wakes the transcription worker when new audio is buffered
    wake: Notify,

    /// Handle for the transcription worker task
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    pub fn new(session: StreamSession, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            id: session.id().clone(),
            state: Mutex::new(session),
            events,
            wake: Notify::new(),
            worker: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub async fn lock(&self) -> MutexGuard<'_, StreamSession> {
        self.state.lock().await
    }

    /// Publish an event; having no subscribers is not an error
    pub fn emit(&self, event: StreamEvent) {
        debug!(session_id = %self.id, event = event.name(), "Emitting event");
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    pub fn wake_worker(&self) {
        self.wake.notify_one();
    }

    pub async fn wait_for_work(&self) {
        self.wake.notified().await;
    }

    pub async fn set_worker(&self, task: JoinHandle<()>) {
        let mut handle = self.worker.lock().await;
        if let Some(previous) = handle.replace(task) {
            previous.abort();
        }
    }

    /// Let the worker drain what is ready, then wait for it to exit
    ///
    /// Callers must have moved the session out of live streaming first.
    pub async fn finish_worker(&self) {
        let task = self.worker.lock().await.take();
        if let Some(task) = task {
            self.wake.notify_one();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(session_id = %self.id, "Transcription worker panicked: {}", e);
                }
            }
        }
    }

    pub async fn stop_worker(&self) {
        let mut handle = self.worker.lock().await;
        if let Some(task) = handle.take() {
            task.abort();
        }
    }
}

/// Owner of every session and of the socket → session bindings
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
    sockets: RwLock<HashMap<String, SessionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: Arc<SessionHandle>) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(handle.id().clone(), handle);
    }

    pub async fn get(&self, id: &SessionId) -> StreamResult<Arc<SessionHandle>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| StreamError::SessionNotFound(id.clone()))
    }

    pub async fn remove(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        let removed = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(id)
        };

        let mut sockets = self.sockets.write().await;
        sockets.retain(|_, bound| bound != id);
        removed
    }

    pub async fn all(&self) -> Vec<Arc<SessionHandle>> {
        let sessions = self.sessions.read().await;
        sessions.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn bind_socket(&self, socket_id: &str, id: &SessionId) {
        let mut sockets = self.sockets.write().await;
        sockets.insert(socket_id.to_string(), id.clone());
    }

    pub async fn unbind_socket(&self, socket_id: &str) -> Option<SessionId> {
        let mut sockets = self.sockets.write().await;
        sockets.remove(socket_id)
    }

    pub async fn session_for_socket(&self, socket_id: &str) -> Option<SessionId> {
        let sockets = self.sockets.read().await;
        sockets.get(socket_id).cloned()
    }
}
