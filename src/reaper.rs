use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::service::StreamService;

/// Periodically time out idle sessions and clean up expired ones
pub fn spawn_reaper(service: Arc<StreamService>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Session reaper running every {}ms", period.as_millis());

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = service.sweep(Utc::now()).await;
            if report.is_empty() {
                debug!("Reaper sweep found nothing to do");
            }
        }
    })
}
