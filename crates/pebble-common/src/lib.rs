//! Shared utilities for Pebble: logging, error types, environment helpers.
//!
//! This crate provides common infrastructure used across all Pebble components.

#![forbid(unsafe_code)]

pub mod error;
pub mod helpers;

pub use error::{Error, ErrorKind, Result};
pub use helpers::{env_duration_ms, env_string, env_u16, env_u32};

/// Initialize tracing with sensible defaults.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Defaults to `info` if not set.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Initialize tracing with a specific default level.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // A second initialisation (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
