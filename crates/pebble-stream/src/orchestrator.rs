//! Session orchestration.
//!
//! ```text
//! idle -> starting -> (server ready) -> starting -> (published) -> running
//!   ^        |                                                      |
//!   |        +--> error (everything already started is torn down)   |
//!   +------------------------- stopping <---------------------------+
//! ```
//!
//! The orchestrator is the only writer of session state. Sub-components
//! are reached through their traits only. Every transition goes out to
//! the status hub.
//!
//! Starts are serialized. A caller that queued behind an in-flight start
//! gets that start's outcome. `stop()` does not wait for an in-flight start
//! to finish: it interrupts it at the current stage and the interrupted
//! start tears down whatever it already brought up.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use pebble_common::{Error, Result};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::poller::{HttpPlaybackProbe, PlaybackProbe, PollHandle, PollOptions, ReadinessPoller};
use crate::session::{StreamSession, StreamSnapshot, StreamStatus};
use crate::settings::StreamerSettings;
use crate::status::{SinkRegistration, StatusHub, StatusSink};
use crate::stream_id;
use crate::supervisor::{ExitCallback, MediaServer, ProcessSupervisor, ServerStatus};
use crate::whip::{MediaStream, Publisher, PublishState, StateCallback, WhipClient};

/// Session state plus the hub it reports to. Every mutation publishes the
/// resulting snapshot while still holding the lock, so subscribers see
/// transitions in order.
struct SessionState {
    session: Mutex<StreamSession>,
    hub: StatusHub,
}

impl SessionState {
    fn snapshot(&self) -> StreamSnapshot {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot()
    }

    fn apply(&self, change: impl FnOnce(&mut StreamSession)) -> StreamSnapshot {
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        change(&mut session);
        let snapshot = session.snapshot();
        self.hub.publish(snapshot.clone());
        snapshot
    }

    /// Applies `change` only while `run` is still the current run.
    fn apply_for_run(&self, run: u64, change: impl FnOnce(&mut StreamSession) -> bool) {
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        if session.run != run {
            debug!(run, current = session.run, "ignoring event from a previous run");
            return;
        }
        if change(&mut session) {
            self.hub.publish(session.snapshot());
        }
    }
}

/// Guarded by `SessionOrchestrator::lifecycle`.
#[derive(Default)]
struct Lifecycle {
    poll: Option<PollHandle>,
    /// Outcome of the last start that began a run. Cleared by `stop()`.
    last_start: Option<Result<StreamSnapshot>>,
}

fn share(outcome: &Result<StreamSnapshot>) -> Result<StreamSnapshot> {
    match outcome {
        Ok(snapshot) => Ok(snapshot.clone()),
        Err(e) => Err(Error::from_kind(e.kind(), e.message())),
    }
}

pub struct SessionOrchestrator {
    server: Arc<dyn MediaServer>,
    publisher: Arc<dyn Publisher>,
    poller: ReadinessPoller,
    poll_options: PollOptions,
    /// Serializes start/stop and owns the running poll.
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    /// Bumped each time a start that began a run finishes.
    finished_starts: AtomicU64,
    /// Bumped by every `stop()` before it queues for the lifecycle lock.
    stop_requests: watch::Sender<u64>,
    state: Arc<SessionState>,
}

impl SessionOrchestrator {
    pub fn new(
        server: Arc<dyn MediaServer>,
        publisher: Arc<dyn Publisher>,
        probe: Arc<dyn PlaybackProbe>,
        poll_options: PollOptions,
    ) -> Self {
        let (stop_requests, _) = watch::channel(0);
        Self {
            server,
            publisher,
            poller: ReadinessPoller::new(probe),
            poll_options,
            lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
            finished_starts: AtomicU64::new(0),
            stop_requests,
            state: Arc::new(SessionState {
                session: Mutex::new(StreamSession::default()),
                hub: StatusHub::new(),
            }),
        }
    }

    /// Wires the real supervisor, WHIP client and HTTP probe.
    pub fn from_settings(settings: StreamerSettings) -> Result<Self> {
        let publisher = WhipClient::from_settings(&settings)?;
        let poll_options = settings.poll;
        Ok(Self::new(
            Arc::new(ProcessSupervisor::new(settings)),
            Arc::new(publisher),
            Arc::new(HttpPlaybackProbe::default()),
            poll_options,
        ))
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        self.state.snapshot()
    }

    pub fn server_status(&self) -> ServerStatus {
        self.server.status()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StreamSnapshot> {
        self.state.hub.subscribe()
    }

    pub fn register_sink(&self, sink: Arc<dyn StatusSink>) -> SinkRegistration {
        self.state.hub.register(sink)
    }

    /// Starts a session, or returns the current one if it is already
    /// starting or running. A call that had to wait for another start gets
    /// that start's outcome, error included.
    ///
    /// Without `media` nothing is published and the local RTMP ingest is
    /// left for an external encoder. On failure every component that did
    /// start is stopped again before the error is returned.
    pub async fn start(
        &self,
        requested_id: Option<&str>,
        media: Option<MediaStream>,
    ) -> Result<StreamSnapshot> {
        let ticket = self.finished_starts.load(Ordering::SeqCst);
        let mut stop_requested = self.stop_requests.subscribe();
        let mut lifecycle = self.lifecycle.lock().await;

        if self.finished_starts.load(Ordering::SeqCst) != ticket {
            if let Some(outcome) = &lifecycle.last_start {
                debug!("returning the outcome of the start this call waited for");
                return share(outcome);
            }
        }

        let current = self.state.snapshot();
        if current.status.is_active() {
            debug!(stream_id = ?current.stream_id, "session already active");
            return Ok(current);
        }

        let stream_id = stream_id::resolve(requested_id)?;

        if matches!(stop_requested.has_changed(), Ok(true)) {
            return Err(Error::runtime("stop requested before the session started"));
        }

        if current.status == StreamStatus::Error {
            // A runtime failure leaves the old run's pieces for us to reap.
            self.release_components(&mut lifecycle.poll).await;
        }

        let outcome = self
            .run_start(&mut lifecycle, stream_id, media, &mut stop_requested)
            .await;
        lifecycle.last_start = Some(share(&outcome));
        self.finished_starts.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    async fn run_start(
        &self,
        lifecycle: &mut Lifecycle,
        stream_id: String,
        media: Option<MediaStream>,
        stop_requested: &mut watch::Receiver<u64>,
    ) -> Result<StreamSnapshot> {
        let mut run = 0;
        self.state.apply(|session| run = session.begin_run(stream_id.clone()));
        info!(stream_id = %stream_id, run, "starting stream session");

        let started = unless_stopped(
            stop_requested,
            self.server.start(&stream_id, self.exit_watcher(run)),
        )
        .await;
        let handle = match started {
            Stage::Finished(Ok(handle)) => handle,
            Stage::Finished(Err(e)) => return Err(self.abort_start(&mut lifecycle.poll, e).await),
            Stage::Interrupted => return Err(self.interrupt_start(&mut lifecycle.poll).await),
        };
        let public_url = handle.endpoints.public_url.clone();
        self.state
            .apply(|session| session.endpoints = Some(handle.endpoints));

        lifecycle.poll = Some(self.watch_playback(run, &public_url));

        if let Some(media) = media {
            let published = unless_stopped(
                stop_requested,
                self.publisher.publish(media, self.connection_watcher(run)),
            )
            .await;
            match published {
                Stage::Finished(Ok(())) => {}
                Stage::Finished(Err(e)) => {
                    return Err(self.abort_start(&mut lifecycle.poll, e).await)
                }
                Stage::Interrupted => return Err(self.interrupt_start(&mut lifecycle.poll).await),
            }
        } else {
            info!("no media stream given, waiting for an external encoder");
        }

        let snapshot = self
            .state
            .apply(|session| session.status = StreamStatus::Running);
        info!(stream_id = %stream_id, "stream session running");
        Ok(snapshot)
    }

    /// Stops the session. Never fails; component errors are logged.
    ///
    /// A start in progress is interrupted rather than waited out.
    pub async fn stop(&self) -> StreamSnapshot {
        self.stop_requests.send_modify(|requests| *requests += 1);
        let mut lifecycle = self.lifecycle.lock().await;
        lifecycle.last_start = None;

        let current = self.state.snapshot();
        if current.status == StreamStatus::Idle {
            debug!("stop requested while idle");
            return current;
        }

        info!(stream_id = ?current.stream_id, "stopping stream session");
        self.state
            .apply(|session| session.status = StreamStatus::Stopping);
        self.release_components(&mut lifecycle.poll).await;
        let snapshot = self.state.apply(StreamSession::reset);
        info!("stream session stopped");
        snapshot
    }

    /// Poller first, so a late readiness result cannot touch the session.
    async fn release_components(&self, poll: &mut Option<PollHandle>) {
        if let Some(mut handle) = poll.take() {
            handle.cancel();
        }
        self.publisher.stop().await;
        if let Err(e) = self.server.stop().await {
            warn!("media server stop failed: {}", e);
        }
    }

    async fn abort_start(&self, poll: &mut Option<PollHandle>, e: Error) -> Error {
        error!(kind = ?e.kind(), "stream session failed to start: {}", e.message());
        self.release_components(poll).await;
        self.state.apply(|session| session.fail(&e));
        e
    }

    /// Teardown for a start that `stop()` cut short. Ends idle, so the
    /// waiting `stop()` has nothing left to do.
    async fn interrupt_start(&self, poll: &mut Option<PollHandle>) -> Error {
        info!("stop requested while starting, tearing down");
        self.state
            .apply(|session| session.status = StreamStatus::Stopping);
        self.release_components(poll).await;
        self.state.apply(StreamSession::reset);
        Error::runtime("session stopped while starting")
    }

    fn watch_playback(&self, run: u64, public_url: &str) -> PollHandle {
        let on_ready = Arc::clone(&self.state);
        let on_timeout = Arc::clone(&self.state);
        self.poller.poll(
            public_url,
            move || {
                on_ready.apply_for_run(run, |session| {
                    session.ready_for_playback = true;
                    true
                })
            },
            move || {
                on_timeout.apply_for_run(run, |session| {
                    session.playback_timed_out = true;
                    true
                })
            },
            self.poll_options,
        )
    }

    /// Turns a lost peer connection into a session error. Recovery is a
    /// fresh `start()`.
    fn connection_watcher(&self, run: u64) -> StateCallback {
        let state = Arc::clone(&self.state);
        Arc::new(move |publish_state: PublishState| {
            debug!(run, "publish state {:?}", publish_state);
            if !publish_state.is_session_ending() {
                return;
            }
            state.apply_for_run(run, |session| {
                if session.status != StreamStatus::Running {
                    return false;
                }
                warn!("peer connection {:?}, session lost", publish_state);
                session.fail(&Error::runtime(format!(
                    "peer connection {}",
                    match publish_state {
                        PublishState::Failed => "failed",
                        _ => "disconnected",
                    }
                )));
                true
            });
        })
    }

    /// Same for a media server that dies under a running session. Exits
    /// during startup surface through `MediaServer::start` instead.
    fn exit_watcher(&self, run: u64) -> ExitCallback {
        let state = Arc::clone(&self.state);
        Arc::new(move |reason: String| {
            state.apply_for_run(run, |session| {
                if session.status != StreamStatus::Running {
                    return false;
                }
                warn!("media server exited under a running session: {}", reason);
                session.fail(&Error::runtime(reason));
                true
            });
        })
    }
}

enum Stage<T> {
    Finished(Result<T>),
    Interrupted,
}

/// Runs one start stage, giving up as soon as `stop()` is called.
async fn unless_stopped<T>(
    stop_requested: &mut watch::Receiver<u64>,
    stage: impl Future<Output = Result<T>>,
) -> Stage<T> {
    tokio::select! {
        outcome = stage => Stage::Finished(outcome),
        Ok(()) = stop_requested.changed() => Stage::Interrupted,
    }
}
