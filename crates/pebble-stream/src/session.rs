//! Session state shared with status subscribers.

use pebble_common::{Error, ErrorKind};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Idle,
    Starting,
    Running,
    Stopping,
    Error,
}

impl StreamStatus {
    /// A session in one of these states owns live sub-components.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

/// URLs of one session. Local URLs point at the supervised media server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamEndpoints {
    /// Relay RTMP target the transcoder pushes to.
    pub ingest_url: String,
    /// Public HLS playlist at the relay.
    pub public_url: String,
    /// Local RTMP ingest for external encoders.
    pub rtmp_url: String,
    /// Local HLS playlist.
    pub hls_url: String,
    /// Local WHIP signaling endpoint.
    pub whip_url: String,
}

/// What subscribers see on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamSnapshot {
    pub status: StreamStatus,
    pub stream_id: Option<String>,
    pub endpoints: Option<StreamEndpoints>,
    pub ready_for_playback: bool,
    pub playback_timed_out: bool,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

/// Root session state, mutated only by the orchestrator.
#[derive(Debug, Clone)]
pub(crate) struct StreamSession {
    pub status: StreamStatus,
    pub stream_id: Option<String>,
    pub endpoints: Option<StreamEndpoints>,
    pub ready_for_playback: bool,
    pub playback_timed_out: bool,
    pub last_error: Option<(ErrorKind, String)>,
    /// Bumped on every start so callbacks from an older run can be told
    /// apart from the current one.
    pub run: u64,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self {
            status: StreamStatus::Idle,
            stream_id: None,
            endpoints: None,
            ready_for_playback: false,
            playback_timed_out: false,
            last_error: None,
            run: 0,
        }
    }
}

impl StreamSession {
    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            status: self.status,
            stream_id: self.stream_id.clone(),
            endpoints: self.endpoints.clone(),
            ready_for_playback: self.ready_for_playback,
            playback_timed_out: self.playback_timed_out,
            error: self.last_error.as_ref().map(|(_, message)| message.clone()),
            error_kind: self.last_error.as_ref().map(|(kind, _)| *kind),
        }
    }

    /// Clears per-run fields and enters `starting` for a new run.
    pub fn begin_run(&mut self, stream_id: String) -> u64 {
        let run = self.run + 1;
        *self = Self {
            status: StreamStatus::Starting,
            stream_id: Some(stream_id),
            run,
            ..Self::default()
        };
        run
    }

    /// Back to idle defaults, keeping the run counter.
    pub fn reset(&mut self) {
        let run = self.run;
        *self = Self {
            run,
            ..Self::default()
        };
    }

    pub fn fail(&mut self, error: &Error) {
        self.status = StreamStatus::Error;
        self.endpoints = None;
        self.ready_for_playback = false;
        self.last_error = Some((error.kind(), error.message()));
    }
}
