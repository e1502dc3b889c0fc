//! Pebble CLI: run a stream session and inspect its configuration.

#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use pebble_stream::mediamtx_config::MediaMtxConfig;
use pebble_stream::{
    check_binaries, stream_id, H264FileSource, RelaySettings, SessionOrchestrator,
    StreamSnapshot, StreamStatus, StreamerSettings,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "pebble")]
#[command(about = "Pebble streaming tools")]
struct Args {
    /// Media server executable
    #[arg(long, env = "PEBBLE_MEDIAMTX_PATH", global = true)]
    mediamtx: Option<PathBuf>,

    /// Transcoder executable (discovered when omitted)
    #[arg(long, env = "PEBBLE_FFMPEG_PATH", global = true)]
    ffmpeg: Option<PathBuf>,

    /// Directory holding the media server binary and its config
    #[arg(long, env = "PEBBLE_BIN_DIR", global = true)]
    bin_dir: Option<PathBuf>,

    /// Relay host that receives the stream and serves it publicly
    #[arg(long, env = "PEBBLE_RELAY_HOST", global = true)]
    relay_host: Option<String>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, env = "PEBBLE_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a stream session and run until Ctrl-C
    Start {
        /// Custom stream id (random when omitted)
        #[arg(long)]
        stream_id: Option<String>,

        /// Annex-B H.264 file to publish over WHIP; without it the local
        /// RTMP ingest waits for an external encoder
        #[arg(long)]
        h264_file: Option<PathBuf>,

        /// Frame rate used when replaying --h264-file
        #[arg(long, default_value_t = 30)]
        fps: u32,
    },

    /// Print the media server configuration that would be written
    Config {
        #[arg(long)]
        stream_id: Option<String>,
    },

    /// Validate a stream id
    CheckId { id: String },

    /// Report whether the required executables are installed
    Check,

    /// Show version information
    Version,
}

impl Args {
    fn settings(&self) -> StreamerSettings {
        let mut settings = StreamerSettings::from_env();
        if let Some(dir) = &self.bin_dir {
            let placed = StreamerSettings::with_bin_dir(dir);
            settings.mediamtx_path = placed.mediamtx_path;
            settings.config_path = placed.config_path;
        }
        if let Some(path) = &self.mediamtx {
            settings.mediamtx_path = path.clone();
        }
        if let Some(path) = &self.ffmpeg {
            settings.transcoder_path = Some(path.clone());
        }
        if let Some(host) = &self.relay_host {
            settings.relay = RelaySettings::for_host(host);
        }
        settings
    }
}

fn print_snapshot(snapshot: &StreamSnapshot) {
    match serde_json::to_string(snapshot) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("could not encode snapshot: {}", e),
    }
}

async fn run_session(
    settings: StreamerSettings,
    requested_id: Option<String>,
    h264_file: Option<PathBuf>,
    fps: u32,
) -> Result<()> {
    let report = check_binaries(&settings);
    if !report.is_ready() {
        bail!(
            "media server binary missing or not executable: {}",
            report.mediamtx_path.display()
        );
    }
    if report.transcoder_path.is_none() {
        warn!("ffmpeg not found, relying on the media server's PATH");
    }

    let source = h264_file
        .map(|path| H264FileSource::new(path, fps))
        .transpose()?;
    let orchestrator = SessionOrchestrator::from_settings(settings)?;
    let mut updates = orchestrator.subscribe();

    let media = source.as_ref().map(H264FileSource::media_stream);
    let started = orchestrator.start(requested_id.as_deref(), media).await?;
    if let (Some(id), Some(endpoints)) = (&started.stream_id, &started.endpoints) {
        info!("stream {} live locally, public playlist {}", id, endpoints.public_url);
        if source.is_none() {
            info!("point your encoder at {}", endpoints.rtmp_url);
        }
    }

    let feeder = source.map(|source| {
        tokio::spawn(async move {
            if let Err(e) = source.run().await {
                error!("media replay stopped: {}", e);
            }
        })
    });

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            _ = &mut interrupted => {
                info!("interrupted");
                break;
            }
            update = updates.recv() => match update {
                Ok(snapshot) => {
                    print_snapshot(&snapshot);
                    if snapshot.status == StreamStatus::Error {
                        error!(
                            "session ended: {}",
                            snapshot.error.as_deref().unwrap_or("unknown error")
                        );
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("skipped {} status updates", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    if let Some(feeder) = feeder {
        feeder.abort();
    }
    print_snapshot(&orchestrator.stop().await);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    pebble_common::init_tracing_with_default(&args.log_level);

    match &args.command {
        Command::Start {
            stream_id,
            h264_file,
            fps,
        } => {
            let settings = args.settings();
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            rt.block_on(run_session(settings, stream_id.clone(), h264_file.clone(), *fps))?;
        }
        Command::Config { stream_id: requested } => {
            let settings = args.settings();
            let id = stream_id::resolve(requested.as_deref())?;
            let transcoder = settings
                .transcoder_path
                .as_ref()
                .map(|path| path.to_string_lossy().into_owned());
            println!(
                "{}",
                MediaMtxConfig::from(&settings).render(transcoder.as_deref(), &id)
            );
        }
        Command::CheckId { id } => {
            stream_id::validate(id)?;
            println!("{} is a valid stream id", id);
        }
        Command::Check => {
            let report = check_binaries(&args.settings());
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_ready() {
                bail!("media server is not installed");
            }
        }
        Command::Version => {
            println!("pebble {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_flags_parse() {
        let args = Args::try_parse_from([
            "pebble",
            "--relay-host",
            "relay.test",
            "start",
            "--stream-id",
            "my-room",
            "--fps",
            "25",
        ])
        .expect("parse");

        match args.command {
            Command::Start {
                stream_id, fps, ..
            } => {
                assert_eq!(stream_id.as_deref(), Some("my-room"));
                assert_eq!(fps, 25);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(args.relay_host.as_deref(), Some("relay.test"));
    }

    #[test]
    fn test_flags_override_paths() {
        let args = Args::try_parse_from([
            "pebble",
            "--bin-dir",
            "/opt/pebble/bin",
            "--ffmpeg",
            "/opt/ffmpeg/bin/ffmpeg",
            "--relay-host",
            "relay.test",
            "check",
        ])
        .expect("parse");

        let settings = args.settings();
        assert_eq!(
            settings.config_path,
            PathBuf::from("/opt/pebble/bin").join("mediamtx.yml")
        );
        assert_eq!(
            settings.transcoder_path,
            Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg"))
        );
        assert_eq!(settings.relay.public_url("abc"), "https://relay.test/abc/index.m3u8");
    }

    #[test]
    fn test_check_id_requires_argument() {
        assert!(Args::try_parse_from(["pebble", "check-id"]).is_err());
    }
}
