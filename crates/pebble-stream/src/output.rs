//! Child process output handling: line reassembly and severity
//! classification.
//!
//! Pipe reads do not respect line boundaries, so chunks are buffered until a
//! newline arrives. The media server and the transcoder it launches both
//! write plenty of harmless chatter to stderr; only lines outside the
//! allow-list below are treated as failures. The list is best-effort and new
//! upstream log formats will show up as fatal until added here.

use once_cell::sync::Lazy;
use regex::Regex;

/// Reassembles arbitrary chunks into complete, non-blank lines.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: String,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every line it completed. A trailing
    /// partial line stays buffered.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };

        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);
        complete
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Text received after the last newline.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Drains the partial line, if any, once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim_end_matches(['\r', '\n']);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Informational,
    Fatal,
}

const MEDIA_SERVER_CHATTER: &[&str] = &["Exiting normally", "Request interrupted"];

const TRANSCODER_CHATTER: &[&str] = &[
    // banner
    "ffmpeg version",
    "configuration:",
    "built with",
    "libavutil",
    "libavcodec",
    "libavformat",
    "libavdevice",
    "libavfilter",
    "libswscale",
    "libswresample",
    "libpostproc",
    // input/stream announcements
    "Input #",
    "Stream #",
    "Metadata:",
    "Duration:",
    "title",
    "Press [q] to stop",
    // keyframe waits right after a publisher connects
    "Keyframe missing",
    "Discarding interframe without a prior keyframe",
    "Error submitting packet to decoder",
    // packet loss on the local RTP leg
    "RTP: missed",
    // printed when the source goes away at stop
    "Conversion failed!",
];

/// `[rtsp @ 0x7f8b1c000000]` or `[libx264 @ 0000028b3bc75040]`
static CONTEXT_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]+\s+@\s+(?:0x)?[0-9a-fA-F]+\]").expect("valid regex"));

pub fn is_media_server_chatter(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty()
        || MEDIA_SERVER_CHATTER
            .iter()
            .any(|pattern| trimmed.contains(pattern))
}

pub fn is_transcoder_chatter(line: &str) -> bool {
    TRANSCODER_CHATTER.iter().any(|pattern| line.contains(pattern))
        || CONTEXT_PREFIX.is_match(line)
        || line.trim_start().starts_with("frame=")
}

pub fn classify(line: &str) -> LineClass {
    if is_media_server_chatter(line) || is_transcoder_chatter(line) {
        LineClass::Informational
    } else {
        LineClass::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_line() {
        let mut splitter = LineSplitter::new();
        assert_eq!(splitter.push("hello world\n"), vec!["hello world"]);
        assert_eq!(splitter.pending(), "");
    }

    #[test]
    fn test_partial_line_is_buffered() {
        let mut splitter = LineSplitter::new();
        assert_eq!(splitter.push("complete line\nincomplete"), vec!["complete line"]);
        assert_eq!(splitter.pending(), "incomplete");
        assert!(splitter.push("still no newline").is_empty());
        assert_eq!(splitter.pending(), "incompletestill no newline");
    }

    #[test]
    fn test_chunks_reassemble_into_one_classified_line() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push("Stream #0:0: Video").is_empty());
        let lines = splitter.push(": h264, 1080p\n");
        assert_eq!(lines, vec!["Stream #0:0: Video: h264, 1080p"]);
        assert_eq!(classify(&lines[0]), LineClass::Informational);
    }

    #[test]
    fn test_blank_lines_and_crlf() {
        let mut splitter = LineSplitter::new();
        assert_eq!(
            splitter.push("line1\r\n\r\n   \nline2\n"),
            vec!["line1", "line2"]
        );
    }

    #[test]
    fn test_finish_flushes_partial_line() {
        let mut splitter = LineSplitter::new();
        splitter.push("bind: address already in use");
        assert_eq!(
            splitter.finish().as_deref(),
            Some("bind: address already in use")
        );
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_banner_and_library_lines_are_informational() {
        for line in [
            "ffmpeg version 6.0 Copyright (c) 2000-2023",
            "configuration: --enable-gpl --enable-nonfree",
            "built with gcc 12.2.0",
            "libavutil      58.  2.100",
            "libswresample   4. 10.100",
            "libpostproc    57.  1.100",
            "Input #0, rtsp, from 'rtsp://localhost:8554/live'",
            "Duration: N/A, start: 0.000000, bitrate: N/A",
            "title           : Video Stream",
            "Press [q] to stop, [?] for help",
        ] {
            assert_eq!(classify(line), LineClass::Informational, "{line}");
        }
    }

    #[test]
    fn test_context_prefixed_lines_are_informational() {
        for line in [
            "[rtsp @ 0x7f8b1c000000] some message",
            "[dec:vp8 @ 0x7f8b1c000000] some message",
            "[vist#0:0/0 @ 0x7f8b1c000000] some message",
            "[flv @ 0xb03050500] Failed to update header with correct duration.",
            "[vf#0:0 @ 0000022f7f8dee40] Reconfiguring filter graph",
            "[libx264 @ 0000028b3bc75040] using cpu capabilities: MMX2 SSE2Fast",
        ] {
            assert_eq!(classify(line), LineClass::Informational, "{line}");
        }
    }

    #[test]
    fn test_transient_warnings_and_progress_are_informational() {
        for line in [
            "Keyframe missing (requests recovery)",
            "Discarding interframe without a prior keyframe",
            "Error submitting packet to decoder: Invalid data",
            "RTP: missed 3 packets",
            "Conversion failed!",
            "frame=  123 fps=30 q=28.0 size=    1234kB time=00:00:04.10",
            "   frame=  123 fps=30",
        ] {
            assert_eq!(classify(line), LineClass::Informational, "{line}");
        }
    }

    #[test]
    fn test_shutdown_chatter_is_informational() {
        for line in [
            "",
            "   ",
            "Exiting normally, received signal 2.",
            "  Exiting normally  ",
            "Request interrupted by user",
        ] {
            assert_eq!(classify(line), LineClass::Informational, "{line:?}");
        }
    }

    #[test]
    fn test_real_failures_are_fatal() {
        for line in [
            "Connection refused",
            "Unknown error occurred",
            "Failed to open input stream",
            "address already in use",
            "bind: permission denied",
            "ERR: yaml: line 3: mapping values are not allowed in this context",
        ] {
            assert_eq!(classify(line), LineClass::Fatal, "{line}");
        }
    }
}
