use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::ErrorCode;
use crate::pipeline::StreamEvent;

/// What a socket's forwarder does with the next session event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forward {
    Publish,
    /// Deliver this event, then stop
    PublishAndStop,
    Stop,
}

/// Decide whether an event still belongs on a socket
///
/// A socket that no longer maps to the session only gets the idle timeout
/// notice, which the reaper raises as it releases the binding.
pub fn forward_decision(event: &StreamEvent, still_bound: bool) -> Forward {
    if still_bound {
        return Forward::Publish;
    }
    match event {
        StreamEvent::Error {
            code: ErrorCode::SessionTimeout,
            ..
        } => Forward::PublishAndStop,
        _ => Forward::Stop,
    }
}

/// One event forwarder per socket
#[derive(Default)]
pub struct EventForwarders {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl EventForwarders {
    /// Register the forwarder for a socket, aborting any it replaces
    pub async fn replace(&self, socket_id: &str, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|_, existing| !existing.is_finished());
        if let Some(previous) = tasks.insert(socket_id.to_string(), task) {
            previous.abort();
        }
    }

    /// Stop forwarding to a socket that went away
    pub async fn remove(&self, socket_id: &str) -> bool {
        match self.tasks.lock().await.remove(socket_id) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.tasks
            .lock()
            .await
            .values()
            .filter(|task| !task.is_finished())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn parked() -> (JoinHandle<()>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });
        (task, rx)
    }

    #[test]
    fn test_bound_socket_gets_every_event() {
        let event = StreamEvent::Paused {
            session_id: "stream-1".into(),
        };
        assert_eq!(forward_decision(&event, true), Forward::Publish);
        assert_eq!(forward_decision(&event, false), Forward::Stop);
    }

    #[test]
    fn test_timeout_notice_survives_unbinding() {
        let timeout = StreamEvent::Error {
            code: ErrorCode::SessionTimeout,
            message: "idle".to_string(),
        };
        assert_eq!(forward_decision(&timeout, false), Forward::PublishAndStop);

        let other = StreamEvent::Error {
            code: ErrorCode::TranscriptionFailed,
            message: "down".to_string(),
        };
        assert_eq!(forward_decision(&other, false), Forward::Stop);
    }

    #[tokio::test]
    async fn test_replacing_a_forwarder_aborts_the_old_one() {
        let forwarders = EventForwarders::default();
        let (first, first_done) = parked();
        let (second, mut second_done) = parked();

        forwarders.replace("sock-1", first).await;
        forwarders.replace("sock-1", second).await;

        // The aborted task drops its sender
        assert!(first_done.await.is_err());
        assert!(matches!(
            second_done.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
        assert_eq!(forwarders.len().await, 1);

        assert!(forwarders.remove("sock-1").await);
        assert!(second_done.await.is_err());
        assert!(!forwarders.remove("sock-1").await);
    }
}
