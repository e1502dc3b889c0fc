//! Locating the media server and transcoder executables.
//!
//! Downloading and installing them is someone else's job; this module only
//! answers "where are they" and "can we run them".

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::settings::StreamerSettings;

pub const MEDIAMTX_CONFIG_FILE: &str = "mediamtx.yml";

pub fn mediamtx_binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "mediamtx.exe"
    } else {
        "mediamtx"
    }
}

fn transcoder_binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "ffmpeg.exe"
    } else {
        "ffmpeg"
    }
}

/// `<data dir>/pebble/bin`, or `./bin` when the platform has no data dir.
pub fn default_bin_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("pebble").join("bin"))
        .unwrap_or_else(|| PathBuf::from("bin"))
}

fn common_transcoder_locations() -> &'static [&'static str] {
    if cfg!(target_os = "macos") {
        &[
            "/opt/homebrew/bin/ffmpeg",
            "/usr/local/bin/ffmpeg",
            "/usr/bin/ffmpeg",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            "C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe",
            "C:\\ffmpeg\\bin\\ffmpeg.exe",
        ]
    } else {
        &["/usr/bin/ffmpeg", "/usr/local/bin/ffmpeg"]
    }
}

/// Finds `ffmpeg` on `PATH`, then in the usual install locations.
///
/// Packaged desktop apps often start with a reduced `PATH`, hence the
/// second pass.
pub fn find_transcoder() -> Option<PathBuf> {
    let on_path = std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(transcoder_binary_name()))
            .find(|candidate| candidate.is_file())
    });

    let found = on_path.or_else(|| {
        common_transcoder_locations()
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.is_file())
    });

    debug!(path = ?found, "transcoder lookup");
    found
}

#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Result of checking the externally installed executables.
#[derive(Debug, Clone, Serialize)]
pub struct BinaryReport {
    pub mediamtx_path: PathBuf,
    pub mediamtx_ready: bool,
    pub transcoder_path: Option<PathBuf>,
}

impl BinaryReport {
    pub fn is_ready(&self) -> bool {
        self.mediamtx_ready
    }
}

pub fn check_binaries(settings: &StreamerSettings) -> BinaryReport {
    BinaryReport {
        mediamtx_path: settings.mediamtx_path.clone(),
        mediamtx_ready: is_executable(&settings.mediamtx_path),
        transcoder_path: settings
            .transcoder_path
            .clone()
            .filter(|path| path.is_file()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_mediamtx_is_not_ready() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = StreamerSettings::with_bin_dir(dir.path());

        let report = check_binaries(&settings);
        assert!(!report.is_ready());
        assert!(report.transcoder_path.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_bit_is_required() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let settings = StreamerSettings::with_bin_dir(dir.path());
        std::fs::write(&settings.mediamtx_path, b"#!/bin/sh\n").expect("write");

        assert!(!check_binaries(&settings).is_ready());

        let mut perms = std::fs::metadata(&settings.mediamtx_path)
            .expect("metadata")
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&settings.mediamtx_path, perms).expect("chmod");

        assert!(check_binaries(&settings).is_ready());
    }

    #[test]
    fn test_default_bin_dir_ends_in_bin() {
        assert!(default_bin_dir().ends_with("bin"));
    }
}
