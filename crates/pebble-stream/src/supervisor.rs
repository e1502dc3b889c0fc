//! Media server process supervision.
//!
//! State machine:
//! ```text
//! stopped -> starting -> ready -> stopping -> stopped
//!                     \-> failed (child torn down)
//! ```
//!
//! The child is owned by a waiter task; everything else talks to it over
//! a control channel and learns about its exit through a watch channel.
//! Readiness is the configured marker on stdout. If the marker never shows
//! up, a HEAD probe against the local HLS listener decides.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pebble_common::{Error, Result};
use reqwest::StatusCode;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::mediamtx_config;
use crate::output::{classify, LineClass, LineSplitter};
use crate::session::StreamEndpoints;
use crate::settings::StreamerSettings;

/// How long the waiter lets the pipe readers flush after the child exits.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
/// Bound on waiting for exit after SIGKILL.
const KILL_WAIT_TIMEOUT: Duration = Duration::from_secs(2);
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandle {
    pub pid: u32,
    pub endpoints: StreamEndpoints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ServerStatus {
    pub running: bool,
    pub pid: Option<u32>,
}

/// Called with a description when the server exits without being asked to.
pub type ExitCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Lifecycle of the local media server.
#[async_trait]
pub trait MediaServer: Send + Sync {
    /// Spawns the server and resolves once it is ready. A second call while
    /// a server is up returns the existing handle and drops `on_exit`.
    async fn start(&self, stream_id: &str, on_exit: ExitCallback) -> Result<ServerHandle>;

    /// Resolves once the process has exited. No-op when nothing runs.
    /// Fails with a timeout if the process outlives SIGKILL.
    async fn stop(&self) -> Result<()>;

    /// Snapshot without I/O.
    fn status(&self) -> ServerStatus;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Terminate,
    Kill,
}

#[derive(Debug)]
enum StartupEvent {
    Ready,
    Fatal(String),
    Exited(String),
}

struct RunningChild {
    handle: ServerHandle,
    control: mpsc::UnboundedSender<Control>,
    exited: watch::Receiver<bool>,
}

type SharedChild = Arc<Mutex<Option<RunningChild>>>;
type SharedError = Arc<Mutex<Option<String>>>;
type ConfigRenderer = Box<dyn Fn(&str) -> String + Send + Sync>;

pub struct ProcessSupervisor {
    settings: StreamerSettings,
    renderer: Option<ConfigRenderer>,
    lifecycle: tokio::sync::Mutex<()>,
    child: SharedChild,
    last_error: SharedError,
    probe_client: reqwest::Client,
}

impl ProcessSupervisor {
    pub fn new(settings: StreamerSettings) -> Self {
        let probe_client = reqwest::Client::builder()
            .timeout(settings.timeouts.health_probe)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            settings,
            renderer: None,
            lifecycle: tokio::sync::Mutex::new(()),
            child: Arc::new(Mutex::new(None)),
            last_error: Arc::new(Mutex::new(None)),
            probe_client,
        }
    }

    /// Replaces the media server config with `render(stream_id)`.
    pub fn with_config_renderer(
        mut self,
        render: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.renderer = Some(Box::new(render));
        self
    }

    pub fn settings(&self) -> &StreamerSettings {
        &self.settings
    }

    /// Last fatal output line or unexpected exit.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn current_handle(&self) -> Option<ServerHandle> {
        self.child
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|running| running.handle.clone())
    }

    fn record_error(slot: &SharedError, message: String) {
        *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(message);
    }

    async fn write_config(&self, stream_id: &str) -> std::io::Result<()> {
        let Some(render) = &self.renderer else {
            return mediamtx_config::write_config(&self.settings, stream_id).await;
        };
        if let Some(parent) = self.settings.config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.settings.config_path, render(stream_id)).await
    }

    /// A crash of a previous run can leave a server behind holding the ports.
    #[cfg(windows)]
    async fn kill_stray_instances(&self) {
        let image = self
            .settings
            .mediamtx_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| crate::binaries::mediamtx_binary_name().to_string());
        match Command::new("taskkill")
            .args(["/F", "/IM", &image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) if status.success() => info!("terminated stray {}", image),
            Ok(_) => debug!("no stray {} running", image),
            Err(e) => debug!("taskkill failed: {}", e),
        }
    }

    /// 200 or 404 from the local HLS listener means the server is serving.
    async fn health_probe(&self) -> bool {
        let url = self.settings.local_hls_url();
        match self.probe_client.head(&url).send().await {
            Ok(response) => {
                let alive = matches!(response.status(), StatusCode::OK | StatusCode::NOT_FOUND);
                debug!("health probe {} -> {}", url, response.status());
                alive
            }
            Err(e) => {
                debug!("health probe {} failed: {}", url, e);
                false
            }
        }
    }

    async fn await_ready(&self, events: &mut mpsc::UnboundedReceiver<StartupEvent>) -> Result<()> {
        let window = self.settings.timeouts.startup;
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);
        let mut last_fatal: Option<String> = None;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(StartupEvent::Ready) => return Ok(()),
                    Some(StartupEvent::Fatal(line)) => last_fatal = Some(line),
                    Some(StartupEvent::Exited(description)) => {
                        return Err(Error::spawn(last_fatal.unwrap_or(description)));
                    }
                    None => {
                        return Err(Error::spawn(
                            last_fatal.unwrap_or_else(|| "media server exited".to_string()),
                        ));
                    }
                },
                _ = &mut deadline => {
                    if self.health_probe().await {
                        info!("no readiness marker within {:?}, but health probe answered", window);
                        return Ok(());
                    }
                    return Err(match last_fatal {
                        Some(line) => Error::spawn(line),
                        None => Error::timeout(format!(
                            "media server did not become ready within {:?}",
                            window
                        )),
                    });
                }
            }
        }
    }

    /// Terminate, wait out the grace period, then kill. The child stays in
    /// its slot until the waiter sees it exit.
    async fn shutdown(&self) -> Result<()> {
        let running = self
            .child
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|running| {
                (
                    running.handle.pid,
                    running.control.clone(),
                    running.exited.clone(),
                )
            });
        let Some((pid, control, mut exited)) = running else {
            return Ok(());
        };
        let grace = self.settings.timeouts.stop_grace;

        info!(pid, "stopping media server");
        let _ = control.send(Control::Terminate);
        if wait_for_exit(&mut exited, grace).await {
            info!(pid, "media server stopped");
            return Ok(());
        }

        warn!(pid, "media server ignored SIGTERM for {:?}, killing", grace);
        let _ = control.send(Control::Kill);
        if wait_for_exit(&mut exited, KILL_WAIT_TIMEOUT).await {
            info!(pid, "media server killed");
            return Ok(());
        }
        error!(pid, "media server still running after kill");
        Err(Error::timeout(format!(
            "media server {} still running {:?} after SIGKILL",
            pid, KILL_WAIT_TIMEOUT
        )))
    }
}

#[async_trait]
impl MediaServer for ProcessSupervisor {
    async fn start(&self, stream_id: &str, on_exit: ExitCallback) -> Result<ServerHandle> {
        let _lifecycle = self.lifecycle.lock().await;
        if let Some(handle) = self.current_handle() {
            debug!(pid = handle.pid, "media server already running");
            return Ok(handle);
        }
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;

        #[cfg(windows)]
        self.kill_stray_instances().await;

        if let Err(e) = self.write_config(stream_id).await {
            warn!(
                "could not write {}: {}",
                self.settings.config_path.display(),
                e
            );
        }

        let path = &self.settings.mediamtx_path;
        let mut command = Command::new(path);
        command
            .arg(&self.settings.config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| spawn_error(path, e))?;
        let Some(pid) = child.id() else {
            return Err(Error::spawn("media server exited during spawn"));
        };
        info!(pid, stream_id, "spawned {}", path.display());

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            let marker = self.settings.readiness_marker.clone();
            let events = event_tx.clone();
            let mut ready = false;
            readers.push(tokio::spawn(pump_lines(stdout, move |line| {
                debug!(target: "mediamtx", "{}", line);
                if !ready && line.contains(&marker) {
                    ready = true;
                    let _ = events.send(StartupEvent::Ready);
                }
            })));
        }
        if let Some(stderr) = child.stderr.take() {
            let events = event_tx.clone();
            let last_error = Arc::clone(&self.last_error);
            readers.push(tokio::spawn(pump_lines(stderr, move |line| {
                match classify(&line) {
                    LineClass::Informational => debug!(target: "mediamtx", "{}", line),
                    LineClass::Fatal => {
                        error!(target: "mediamtx", "{}", line);
                        Self::record_error(&last_error, line.clone());
                        let _ = events.send(StartupEvent::Fatal(line));
                    }
                }
            })));
        }

        let handle = ServerHandle {
            pid,
            endpoints: self.settings.endpoints(stream_id),
        };
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (exited_tx, exited_rx) = watch::channel(false);
        *self.child.lock().unwrap_or_else(|e| e.into_inner()) = Some(RunningChild {
            handle: handle.clone(),
            control: control_tx,
            exited: exited_rx,
        });

        tokio::spawn(supervise(
            child,
            pid,
            control_rx,
            readers,
            event_tx,
            exited_tx,
            Arc::clone(&self.child),
            Arc::clone(&self.last_error),
            on_exit,
        ));

        match self.await_ready(&mut event_rx).await {
            Ok(()) => {
                info!(pid, "media server ready");
                Ok(handle)
            }
            Err(e) => {
                error!(pid, "media server failed to start: {}", e);
                if let Err(stop_err) = self.shutdown().await {
                    warn!("{}", stop_err);
                }
                Self::record_error(&self.last_error, e.message());
                Err(e)
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.shutdown().await
    }

    fn status(&self) -> ServerStatus {
        let child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        ServerStatus {
            running: child.is_some(),
            pid: child.as_ref().map(|running| running.handle.pid),
        }
    }
}

fn spawn_error(path: &Path, e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::NotFound => {
            Error::spawn(format!("media server binary not found at {}", path.display()))
        }
        std::io::ErrorKind::PermissionDenied => Error::spawn(format!(
            "media server binary at {} is not executable",
            path.display()
        )),
        _ => Error::spawn(format!("failed to start {}: {}", path.display(), e)),
    }
}

async fn wait_for_exit(exited: &mut watch::Receiver<bool>, limit: Duration) -> bool {
    // A dropped sender means the waiter is gone along with the child.
    tokio::time::timeout(limit, exited.wait_for(|done| *done))
        .await
        .is_ok()
}

/// Feeds complete lines from `reader` to `on_line` until EOF.
async fn pump_lines<R>(mut reader: R, mut on_line: impl FnMut(String) + Send)
where
    R: AsyncRead + Unpin + Send,
{
    let mut splitter = LineSplitter::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("pipe read failed: {}", e);
                break;
            }
        };
        for line in splitter.push(&String::from_utf8_lossy(&chunk[..read])) {
            on_line(line);
        }
    }
    if let Some(line) = splitter.finish() {
        on_line(line);
    }
}

fn describe_exit(status: &std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => match status.code() {
            Some(code) => format!("media server exited with code {}", code),
            None => "media server was terminated by a signal".to_string(),
        },
        Err(e) => format!("lost track of media server: {}", e),
    }
}

#[cfg(unix)]
fn deliver(child: &mut Child, pid: u32, control: Control) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let signal = match control {
        Control::Terminate => Signal::SIGTERM,
        Control::Kill => Signal::SIGKILL,
    };
    // The child leads its own process group, so the transcoder goes too.
    if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
        debug!(pid, "killpg {:?} failed: {}", signal, e);
        if control == Control::Kill {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn deliver(child: &mut Child, pid: u32, _control: Control) {
    if let Err(e) = child.start_kill() {
        debug!(pid, "kill failed: {}", e);
    }
}

/// Owns the child until it exits. `on_exit` fires only for exits nobody
/// asked for.
#[allow(clippy::too_many_arguments)]
async fn supervise(
    mut child: Child,
    pid: u32,
    mut control: mpsc::UnboundedReceiver<Control>,
    readers: Vec<JoinHandle<()>>,
    events: mpsc::UnboundedSender<StartupEvent>,
    exited: watch::Sender<bool>,
    slot: SharedChild,
    last_error: SharedError,
    on_exit: ExitCallback,
) {
    let mut stopping = false;
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(signal) = control.recv() => {
                stopping = true;
                deliver(&mut child, pid, signal);
            }
        }
    };

    for reader in readers {
        let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await;
    }

    let description = describe_exit(&status);
    let clean = matches!(&status, Ok(s) if s.success());
    if stopping || clean {
        debug!(pid, "{}", description);
    } else {
        warn!(pid, "{}", description);
        let mut slot = last_error.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(description.clone());
        }
    }

    let _ = events.send(StartupEvent::Exited(description.clone()));
    {
        let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|running| running.handle.pid == pid) {
            *slot = None;
        }
    }
    let _ = exited.send(true);
    if !stopping {
        let reason = last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or(description);
        on_exit(reason);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pebble_common::ErrorKind;
    use std::path::PathBuf;
    use std::time::Instant;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Runs `/bin/sh <dir>/server.sh`, where the script is `script` with
    /// `{id}` replaced by the stream id.
    fn shell_supervisor(dir: &TempDir, script: &'static str) -> ProcessSupervisor {
        let mut settings = StreamerSettings::with_bin_dir(dir.path());
        settings.mediamtx_path = PathBuf::from("/bin/sh");
        settings.config_path = dir.path().join("server.sh");
        settings.ports.hls = 9;
        settings.timeouts.startup = Duration::from_millis(800);
        settings.timeouts.stop_grace = Duration::from_millis(300);
        settings.timeouts.health_probe = Duration::from_millis(300);
        ProcessSupervisor::new(settings).with_config_renderer(move |id| script.replace("{id}", id))
    }

    fn ignore_exit() -> ExitCallback {
        Arc::new(|_| {})
    }

    async fn wait_until_stopped(supervisor: &ProcessSupervisor) -> bool {
        for _ in 0..100 {
            if !supervisor.status().running {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_marker_on_stdout_means_ready() {
        let dir = tempfile::tempdir().expect("tempdir");
        let supervisor = shell_supervisor(
            &dir,
            "echo 'ffmpeg version 6.0' >&2\necho 'INF [RTSP] listener opened on :8554 ({id})'\nexec sleep 30\n",
        );

        let handle = supervisor.start("my-room", ignore_exit()).await.expect("start");
        assert!(handle.pid > 0);
        assert!(handle.endpoints.ingest_url.ends_with("/my-room"));
        assert_eq!(
            supervisor.status(),
            ServerStatus {
                running: true,
                pid: Some(handle.pid)
            }
        );
        let config = std::fs::read_to_string(dir.path().join("server.sh")).expect("config");
        assert!(config.contains("(my-room)"));
        assert_eq!(supervisor.last_error(), None);

        supervisor.stop().await.expect("stop");
        assert_eq!(supervisor.status(), ServerStatus::default());
        supervisor.stop().await.expect("second stop");
    }

    #[tokio::test]
    async fn test_concurrent_start_spawns_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let supervisor = shell_supervisor(&dir, "sleep 0.2\necho 'listener opened'\nexec sleep 30\n");

        let (first, second) = tokio::join!(
            supervisor.start("abc", ignore_exit()),
            supervisor.start("abc", ignore_exit())
        );
        assert_eq!(first.expect("first").pid, second.expect("second").pid);

        supervisor.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_exit_before_ready_reports_last_fatal_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let supervisor = shell_supervisor(
            &dir,
            "echo 'libavcodec 60. 3.100' >&2\necho 'ERR: listen tcp :8554: bind: address already in use' >&2\nexit 1\n",
        );

        let err = supervisor.start("abc", ignore_exit()).await.expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Spawn);
        assert!(err.message().contains("address already in use"), "{}", err);
        assert!(!supervisor.status().running);
        assert!(supervisor
            .last_error()
            .is_some_and(|e| e.contains("address already in use")));
    }

    #[tokio::test]
    async fn test_exit_before_ready_without_output_reports_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let supervisor = shell_supervisor(&dir, "exit 3\n");

        let err = supervisor.start("abc", ignore_exit()).await.expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Spawn);
        assert!(err.message().contains("code 3"), "{}", err);
    }

    #[tokio::test]
    async fn test_missing_binary_names_the_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut settings = StreamerSettings::with_bin_dir(dir.path());
        settings.mediamtx_path = dir.path().join("mediamtx");
        let supervisor = ProcessSupervisor::new(settings);

        let err = supervisor.start("abc", ignore_exit()).await.expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Spawn);
        assert!(err.message().contains("not found"), "{}", err);
        assert!(err.message().contains("mediamtx"), "{}", err);
        // The config is still regenerated ahead of the spawn attempt.
        assert!(dir.path().join("mediamtx.yml").exists());
    }

    #[tokio::test]
    async fn test_silent_start_falls_back_to_health_probe() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/live/index.m3u8"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let mut supervisor = shell_supervisor(&dir, "exec sleep 30\n");
        supervisor.settings.ports.hls = server.address().port();

        let handle = supervisor.start("abc", ignore_exit()).await.expect("probe says alive");
        assert_eq!(supervisor.status().pid, Some(handle.pid));
        supervisor.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_silent_start_with_dead_probe_times_out_and_cleans_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let supervisor = shell_supervisor(&dir, "exec sleep 30\n");

        let err = supervisor.start("abc", ignore_exit()).await.expect_err("should time out");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(!supervisor.status().running);
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        let dir = tempfile::tempdir().expect("tempdir");
        let supervisor = shell_supervisor(
            &dir,
            "trap '' TERM\necho 'listener opened'\nwhile true; do sleep 0.05; done\n",
        );
        supervisor.start("abc", ignore_exit()).await.expect("start");

        let begun = Instant::now();
        supervisor.stop().await.expect("stop");
        assert!(begun.elapsed() >= Duration::from_millis(300));
        assert!(!supervisor.status().running);
    }

    #[tokio::test]
    async fn test_exit_after_ready_clears_handle_and_reports() {
        let dir = tempfile::tempdir().expect("tempdir");
        let supervisor = shell_supervisor(&dir, "echo 'listener opened'\nsleep 0.2\nexit 2\n");
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
        supervisor
            .start(
                "abc",
                Arc::new(move |reason| {
                    let _ = exit_tx.send(reason);
                }),
            )
            .await
            .expect("start");

        let reason = tokio::time::timeout(Duration::from_secs(3), exit_rx.recv())
            .await
            .expect("exit reported")
            .expect("reason");
        assert!(reason.contains("code 2"), "{}", reason);
        assert!(!supervisor.status().running);
        assert!(supervisor.last_error().is_some_and(|e| e.contains("code 2")));
        supervisor.stop().await.expect("stop is a no-op");
    }

    #[tokio::test]
    async fn test_requested_stop_is_not_reported_as_exit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let supervisor = shell_supervisor(&dir, "echo 'listener opened'\nexec sleep 30\n");
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel::<String>();
        supervisor
            .start(
                "abc",
                Arc::new(move |reason| {
                    let _ = exit_tx.send(reason);
                }),
            )
            .await
            .expect("start");

        supervisor.stop().await.expect("stop");
        let reported = tokio::time::timeout(Duration::from_secs(2), exit_rx.recv())
            .await
            .expect("waiter finished");
        assert_eq!(reported, None);
    }

    #[tokio::test]
    async fn test_status_stays_running_during_grace_period() {
        let dir = tempfile::tempdir().expect("tempdir");
        let supervisor = Arc::new(shell_supervisor(
            &dir,
            "trap '' TERM\necho 'listener opened'\nwhile true; do sleep 0.05; done\n",
        ));
        let handle = supervisor.start("abc", ignore_exit()).await.expect("start");

        let stopping = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.stop().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            supervisor.status(),
            ServerStatus {
                running: true,
                pid: Some(handle.pid)
            }
        );

        stopping.await.expect("join").expect("stop");
        assert!(!supervisor.status().running);
    }
}
