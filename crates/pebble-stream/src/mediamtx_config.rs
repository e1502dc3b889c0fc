//! Media server configuration rendering.
//!
//! The output is a YAML document. Rendering is pure; writing it to disk is
//! the supervisor's business.

use std::path::Path;

use crate::settings::{LocalPorts, RelaySettings, StreamerSettings, LOCAL_PATH};

/// Command used when no transcoder path is known; the OS resolves it.
pub const FALLBACK_TRANSCODER: &str = "ffmpeg";

/// Stream path used at the relay when the caller passes an empty id.
const FALLBACK_STREAM_PATH: &str = "live";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaMtxConfig {
    pub ports: LocalPorts,
    pub relay: RelaySettings,
}

impl Default for MediaMtxConfig {
    fn default() -> Self {
        Self {
            ports: LocalPorts::default(),
            relay: RelaySettings::default(),
        }
    }
}

impl From<&StreamerSettings> for MediaMtxConfig {
    fn from(settings: &StreamerSettings) -> Self {
        Self {
            ports: settings.ports,
            relay: settings.relay.clone(),
        }
    }
}

/// Renders with default ports and relay.
pub fn generate(transcoder: Option<&str>, stream_id: &str) -> String {
    MediaMtxConfig::default().render(transcoder, stream_id)
}

/// Forward slashes only: backslashes are escape characters to both YAML
/// and the command splitter.
pub fn normalize_command_path(path: &str) -> String {
    path.replace('\\', "/")
}

fn quote_command_word(word: &str) -> String {
    if word.chars().any(char::is_whitespace) {
        format!("\"{}\"", word)
    } else {
        word.to_string()
    }
}

fn yaml_single_quoted(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl MediaMtxConfig {
    /// Transcoder invocation run when the local path becomes ready: pull the
    /// WHIP input over RTSP, encode H.264 and push FLV to the relay.
    pub fn transcode_command(&self, transcoder: Option<&str>, stream_id: &str) -> String {
        let program = transcoder
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(normalize_command_path)
            .unwrap_or_else(|| FALLBACK_TRANSCODER.to_string());
        let stream_path = if stream_id.is_empty() {
            FALLBACK_STREAM_PATH
        } else {
            stream_id
        };

        format!(
            "{} -i rtsp://localhost:{}/{} -vf \"scale=-2:480\" -c:v libx264 -preset ultrafast \
             -tune zerolatency -g 30 -keyint_min 30 -b:v 1000k -f flv {}",
            quote_command_word(&program),
            self.ports.rtsp,
            LOCAL_PATH,
            self.relay.ingest_url(stream_path)
        )
    }

    pub fn render(&self, transcoder: Option<&str>, stream_id: &str) -> String {
        let run_on_ready = yaml_single_quoted(&self.transcode_command(transcoder, stream_id));
        let ports = &self.ports;

        format!(
            "\
# Pebble media server configuration
# WebRTC (WHIP) in -> H.264 transcode -> RTMP out to the relay

logLevel: info
logDestinations: [stdout]

rtsp: yes
rtspAddress: :{rtsp}

rtmp: yes
rtmpAddress: :{rtmp}

webrtc: yes
webrtcAddress: :{webrtc}

hls: yes
hlsAddress: :{hls}
hlsVariant: mpegts
hlsSegmentCount: 2
hlsSegmentDuration: 1s
hlsPartDuration: 200ms
hlsAllowOrigin: '*'
hlsAlwaysRemux: yes

api: no
metrics: no
pprof: no
srt: no

paths:
  {path}:
    runOnReady: {run_on_ready}
    runOnReadyRestart: yes

  all_others:",
            rtsp = ports.rtsp,
            rtmp = ports.rtmp,
            webrtc = ports.webrtc,
            hls = ports.hls,
            path = LOCAL_PATH,
            run_on_ready = run_on_ready,
        )
    }
}

/// Renders a config for `settings` and writes it to `settings.config_path`.
pub async fn write_config(settings: &StreamerSettings, stream_id: &str) -> std::io::Result<()> {
    let transcoder = settings
        .transcoder_path
        .as_deref()
        .map(Path::to_string_lossy);
    let text = MediaMtxConfig::from(settings).render(transcoder.as_deref(), stream_id);
    if let Some(parent) = settings.config_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&settings.config_path, text).await
}
