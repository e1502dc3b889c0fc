//! Remote playback readiness polling.
//!
//! The local media server being up says nothing about the relay. The poller
//! keeps asking the relay for the public playlist until it answers 200, or
//! gives up after a fixed number of attempts.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_attempts: 60,
        }
    }
}

/// One readiness check against the public endpoint.
#[async_trait]
pub trait PlaybackProbe: Send + Sync {
    /// `true` only when the resource is being served.
    async fn is_playable(&self, url: &str) -> bool;
}

/// GET probe: 200 is playable, any other status or a transport error is not.
#[derive(Debug, Clone)]
pub struct HttpPlaybackProbe {
    client: reqwest::Client,
}

impl HttpPlaybackProbe {
    pub fn new(request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for HttpPlaybackProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl PlaybackProbe for HttpPlaybackProbe {
    async fn is_playable(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                debug!("playback probe {} failed: {}", url, e);
                false
            }
        }
    }
}

/// Lets at most one outcome through, and none after cancellation.
///
/// The outcome callback runs with the lock held, so `cancel()` either
/// happens before the callback starts (and suppresses it) or waits for it
/// to finish.
#[derive(Debug, Default)]
struct OutcomeGate {
    closed: Mutex<bool>,
}

impl OutcomeGate {
    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn close(&self) {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    fn fire(&self, callback: impl FnOnce()) -> bool {
        let mut closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
        if *closed {
            return false;
        }
        *closed = true;
        callback();
        true
    }
}

#[derive(Clone)]
pub struct ReadinessPoller {
    probe: Arc<dyn PlaybackProbe>,
}

impl ReadinessPoller {
    pub fn new(probe: Arc<dyn PlaybackProbe>) -> Self {
        Self { probe }
    }

    /// Starts polling `url` in the background.
    ///
    /// Exactly one of `on_ready` / `on_timeout` runs, unless the returned
    /// handle is cancelled or dropped first. Callbacks must not call back
    /// into the handle.
    pub fn poll<R, T>(
        &self,
        url: impl Into<String>,
        on_ready: R,
        on_timeout: T,
        options: PollOptions,
    ) -> PollHandle
    where
        R: FnOnce() + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        let url = url.into();
        let probe = Arc::clone(&self.probe);
        let gate = Arc::new(OutcomeGate::default());
        let task_gate = Arc::clone(&gate);
        let max_attempts = options.max_attempts.max(1);

        let task = tokio::spawn(async move {
            let mut attempts = 0u32;
            loop {
                if task_gate.is_closed() {
                    return;
                }
                attempts += 1;

                if probe.is_playable(&url).await {
                    if task_gate.fire(on_ready) {
                        info!(attempts, "public playback ready at {}", url);
                    }
                    return;
                }

                if attempts >= max_attempts {
                    if task_gate.fire(on_timeout) {
                        warn!(
                            "public playback check timed out after {} attempts ({})",
                            max_attempts, url
                        );
                    }
                    return;
                }

                debug!(attempts, "public playback not ready yet");
                tokio::time::sleep(options.interval).await;
            }
        });

        PollHandle {
            gate,
            task: Some(task),
        }
    }
}

/// Cancels the poll on `cancel()` or drop.
#[derive(Debug)]
pub struct PollHandle {
    gate: Arc<OutcomeGate>,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    /// After this returns no callback of this poll will run.
    pub fn cancel(&mut self) {
        self.gate.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
