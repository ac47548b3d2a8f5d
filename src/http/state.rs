use crate::service::StreamService;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Streaming core shared with the NATS transport and the reaper
    pub service: Arc<StreamService>,
}

impl AppState {
    pub fn new(service: Arc<StreamService>) -> Self {
        Self { service }
    }
}
