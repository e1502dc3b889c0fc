//! Runtime settings for a streaming session.
//!
//! Every bound the session relies on (startup window, stop grace, retry
//! budgets, poll cadence) lives here so callers and tests can shorten them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pebble_common::{env_duration_ms, env_string, env_u16, env_u32};

use crate::binaries;
use crate::poller::PollOptions;
use crate::session::StreamEndpoints;
use crate::whip::WhipOptions;

pub const DEFAULT_RELAY_HOST: &str = "pebble.xrift.net";
pub const DEFAULT_READINESS_MARKER: &str = "listener opened";
pub const DEFAULT_RELAY_RTMP_PORT: u16 = 1935;

/// Path name the media server publishes WHIP input under.
pub const LOCAL_PATH: &str = "live";

/// Ports the local media server listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalPorts {
    pub rtsp: u16,
    pub rtmp: u16,
    pub hls: u16,
    pub webrtc: u16,
}

impl Default for LocalPorts {
    fn default() -> Self {
        Self {
            rtsp: 8554,
            rtmp: 1935,
            hls: 8888,
            webrtc: 8889,
        }
    }
}

/// Where the transcoder pushes the stream and where viewers fetch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    /// e.g. `rtmp://relay.example:1935`
    pub rtmp_base: String,
    /// e.g. `https://relay.example`
    pub public_base: String,
}

impl RelaySettings {
    pub fn for_host(host: &str) -> Self {
        let host = host.trim().trim_end_matches('/');
        Self {
            rtmp_base: format!("rtmp://{}:{}", host, DEFAULT_RELAY_RTMP_PORT),
            public_base: format!("https://{}", host),
        }
    }

    pub fn ingest_url(&self, stream_id: &str) -> String {
        format!("{}/{}", self.rtmp_base.trim_end_matches('/'), stream_id)
    }

    pub fn public_url(&self, stream_id: &str) -> String {
        format!(
            "{}/{}/index.m3u8",
            self.public_base.trim_end_matches('/'),
            stream_id
        )
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::for_host(DEFAULT_RELAY_HOST)
    }
}

/// Bounds on process lifecycle waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// How long to wait for the readiness marker before probing health.
    pub startup: Duration,
    /// How long a terminated process gets before it is killed.
    pub stop_grace: Duration,
    /// Per-request bound on the local health probe.
    pub health_probe: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            startup: Duration::from_secs(5),
            stop_grace: Duration::from_secs(3),
            health_probe: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamerSettings {
    pub mediamtx_path: PathBuf,
    pub config_path: PathBuf,
    /// `None` leaves resolution of `ffmpeg` to the child's PATH.
    pub transcoder_path: Option<PathBuf>,
    pub ports: LocalPorts,
    pub relay: RelaySettings,
    /// Substring in the media server's stdout that marks it ready.
    pub readiness_marker: String,
    pub timeouts: Timeouts,
    pub whip: WhipOptions,
    pub poll: PollOptions,
}

impl Default for StreamerSettings {
    fn default() -> Self {
        Self::with_bin_dir(binaries::default_bin_dir())
    }
}

impl StreamerSettings {
    /// Defaults with the media server binary and its config under `dir`.
    pub fn with_bin_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            mediamtx_path: dir.join(binaries::mediamtx_binary_name()),
            config_path: dir.join(binaries::MEDIAMTX_CONFIG_FILE),
            transcoder_path: None,
            ports: LocalPorts::default(),
            relay: RelaySettings::default(),
            readiness_marker: DEFAULT_READINESS_MARKER.to_string(),
            timeouts: Timeouts::default(),
            whip: WhipOptions::default(),
            poll: PollOptions::default(),
        }
    }

    /// Defaults overlaid with `PEBBLE_*` environment variables. The
    /// transcoder is discovered on the host when not given explicitly.
    pub fn from_env() -> Self {
        let mut settings = match env_string("PEBBLE_BIN_DIR") {
            Some(dir) => Self::with_bin_dir(dir),
            None => Self::default(),
        };

        if let Some(path) = env_string("PEBBLE_MEDIAMTX_PATH") {
            settings.mediamtx_path = PathBuf::from(path);
        }
        if let Some(path) = env_string("PEBBLE_MEDIAMTX_CONFIG") {
            settings.config_path = PathBuf::from(path);
        }
        settings.transcoder_path = env_string("PEBBLE_FFMPEG_PATH")
            .map(PathBuf::from)
            .or_else(binaries::find_transcoder);
        if let Some(host) = env_string("PEBBLE_RELAY_HOST") {
            settings.relay = RelaySettings::for_host(&host);
        }
        if let Some(marker) = env_string("PEBBLE_READY_MARKER") {
            settings.readiness_marker = marker;
        }

        let ports = &mut settings.ports;
        ports.rtsp = env_u16("PEBBLE_RTSP_PORT", ports.rtsp);
        ports.rtmp = env_u16("PEBBLE_RTMP_PORT", ports.rtmp);
        ports.hls = env_u16("PEBBLE_HLS_PORT", ports.hls);
        ports.webrtc = env_u16("PEBBLE_WEBRTC_PORT", ports.webrtc);

        let timeouts = &mut settings.timeouts;
        timeouts.startup = env_duration_ms("PEBBLE_STARTUP_TIMEOUT_MS", timeouts.startup);
        timeouts.stop_grace = env_duration_ms("PEBBLE_STOP_GRACE_MS", timeouts.stop_grace);

        let whip = &mut settings.whip;
        whip.max_attempts = env_u32("PEBBLE_WHIP_ATTEMPTS", whip.max_attempts);
        whip.retry_delay = env_duration_ms("PEBBLE_WHIP_RETRY_DELAY_MS", whip.retry_delay);
        whip.ice_gather_timeout =
            env_duration_ms("PEBBLE_ICE_GATHER_TIMEOUT_MS", whip.ice_gather_timeout);

        let poll = &mut settings.poll;
        poll.interval = env_duration_ms("PEBBLE_POLL_INTERVAL_MS", poll.interval);
        poll.max_attempts = env_u32("PEBBLE_POLL_ATTEMPTS", poll.max_attempts);

        settings
    }

    /// Local WHIP signaling endpoint.
    pub fn whip_url(&self) -> String {
        format!("http://localhost:{}/{}/whip", self.ports.webrtc, LOCAL_PATH)
    }

    /// Local HLS playlist; also the target of the health probe.
    pub fn local_hls_url(&self) -> String {
        format!(
            "http://localhost:{}/{}/index.m3u8",
            self.ports.hls, LOCAL_PATH
        )
    }

    /// Local RTMP ingest for external encoders.
    pub fn local_rtmp_url(&self) -> String {
        format!("rtmp://localhost:{}/{}", self.ports.rtmp, LOCAL_PATH)
    }

    pub fn endpoints(&self, stream_id: &str) -> StreamEndpoints {
        StreamEndpoints {
            ingest_url: self.relay.ingest_url(stream_id),
            public_url: self.relay.public_url(stream_id),
            rtmp_url: self.local_rtmp_url(),
            hls_url: self.local_hls_url(),
            whip_url: self.whip_url(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_urls_for_host() {
        let relay = RelaySettings::for_host("relay.example/");
        assert_eq!(relay.ingest_url("my-room"), "rtmp://relay.example:1935/my-room");
        assert_eq!(
            relay.public_url("my-room"),
            "https://relay.example/my-room/index.m3u8"
        );
    }

    #[test]
    fn test_endpoints_use_configured_ports() {
        let mut settings = StreamerSettings::with_bin_dir("/opt/pebble/bin");
        settings.ports.webrtc = 9889;
        settings.ports.rtmp = 2935;

        let endpoints = settings.endpoints("abc-123");
        assert_eq!(endpoints.whip_url, "http://localhost:9889/live/whip");
        assert_eq!(endpoints.rtmp_url, "rtmp://localhost:2935/live");
        assert_eq!(endpoints.hls_url, "http://localhost:8888/live/index.m3u8");
        assert!(endpoints.ingest_url.ends_with("/abc-123"));
    }

    #[test]
    fn test_with_bin_dir_places_binary_and_config() {
        let settings = StreamerSettings::with_bin_dir("/opt/pebble/bin");
        assert_eq!(
            settings.config_path,
            PathBuf::from("/opt/pebble/bin").join("mediamtx.yml")
        );
        assert!(settings.mediamtx_path.starts_with("/opt/pebble/bin"));
        assert_eq!(settings.readiness_marker, DEFAULT_READINESS_MARKER);
        assert_eq!(settings.timeouts.startup, Duration::from_secs(5));
        assert_eq!(settings.timeouts.stop_grace, Duration::from_secs(3));
    }
}
