//! Pebble streaming core.
//!
//! Runs a local media server, publishes to it over WHIP, and tracks whether
//! the relay has started serving the stream publicly. `SessionOrchestrator`
//! is the entry point; the other modules are its parts.

#![forbid(unsafe_code)]

pub mod binaries;
pub mod media;
pub mod mediamtx_config;
pub mod orchestrator;
pub mod output;
pub mod poller;
pub mod session;
pub mod settings;
pub mod status;
pub mod stream_id;
pub mod supervisor;
pub mod whip;

pub use binaries::{check_binaries, find_transcoder, BinaryReport};
pub use media::H264FileSource;
pub use orchestrator::SessionOrchestrator;
pub use poller::{HttpPlaybackProbe, PlaybackProbe, PollHandle, PollOptions, ReadinessPoller};
pub use session::{StreamEndpoints, StreamSnapshot, StreamStatus};
pub use settings::{LocalPorts, RelaySettings, StreamerSettings, Timeouts};
pub use status::{SinkRegistration, StatusHub, StatusSink};
pub use supervisor::{ExitCallback, MediaServer, ProcessSupervisor, ServerHandle, ServerStatus};
pub use whip::{
    MediaStream, PublishState, Publisher, StateCallback, WhipClient, WhipOptions, WhipSignaling,
};
