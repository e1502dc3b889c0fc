//! Fan-out of session snapshots to passive subscribers.
//!
//! Delivery never runs on the publisher's stack: each registered sink is
//! fed from its own task, so a slow UI cannot stall a state transition.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::session::StreamSnapshot;

const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Receives snapshots, one call per transition.
pub trait StatusSink: Send + Sync + 'static {
    fn on_status(&self, snapshot: StreamSnapshot);
}

impl<F> StatusSink for F
where
    F: Fn(StreamSnapshot) + Send + Sync + 'static,
{
    fn on_status(&self, snapshot: StreamSnapshot) {
        self(snapshot)
    }
}

#[derive(Debug, Clone)]
pub struct StatusHub {
    tx: broadcast::Sender<StreamSnapshot>,
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHub {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, snapshot: StreamSnapshot) {
        // No subscribers is fine.
        let _ = self.tx.send(snapshot);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamSnapshot> {
        self.tx.subscribe()
    }

    /// Forwards every later snapshot to `sink` until the returned
    /// registration is dropped or unregistered. Must be called inside a
    /// tokio runtime.
    pub fn register(&self, sink: Arc<dyn StatusSink>) -> SinkRegistration {
        let mut rx = self.tx.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(snapshot) => sink.on_status(snapshot),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("status sink lagged, skipped {} snapshots", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("status sink detached");
        });
        SinkRegistration { task: Some(task) }
    }
}

/// Keeps a sink attached. Dropping it detaches the sink.
#[derive(Debug)]
pub struct SinkRegistration {
    task: Option<JoinHandle<()>>,
}

impl SinkRegistration {
    pub fn unregister(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SinkRegistration {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StreamStatus;
    use std::sync::Mutex;
    use std::time::Duration;

    fn snapshot(status: StreamStatus) -> StreamSnapshot {
        StreamSnapshot {
            status,
            stream_id: None,
            endpoints: None,
            ready_for_playback: false,
            playback_timed_out: false,
            error: None,
            error_kind: None,
        }
    }

    #[tokio::test]
    async fn test_subscriber_sees_each_snapshot_once() {
        let hub = StatusHub::new();
        let mut rx = hub.subscribe();

        hub.publish(snapshot(StreamStatus::Starting));
        hub.publish(snapshot(StreamStatus::Running));

        assert_eq!(rx.recv().await.expect("recv").status, StreamStatus::Starting);
        assert_eq!(rx.recv().await.expect("recv").status, StreamStatus::Running);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_registered_sink_stops_after_unregister() {
        let hub = StatusHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let registration = hub.register(Arc::new(move |s: StreamSnapshot| {
            sink_seen.lock().unwrap().push(s.status);
        }));

        hub.publish(snapshot(StreamStatus::Starting));
        for _ in 0..50 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        registration.unregister();

        hub.publish(snapshot(StreamStatus::Running));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*seen.lock().unwrap(), vec![StreamStatus::Starting]);
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        StatusHub::new().publish(snapshot(StreamStatus::Idle));
    }
}
