//! Common error types for Pebble.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using Pebble's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Pebble operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file, pipe, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller-supplied input rejected before any side effect
    #[error("invalid input: {0}")]
    Validation(String),

    /// Child process could not be spawned or died before becoming ready
    #[error("spawn failed: {0}")]
    Spawn(String),

    /// WebRTC offer/answer exchange failed
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// An established session broke down
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Operation timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP transport error
    #[error("http error: {0}")]
    Http(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse discriminator attached to every error that crosses a component
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Spawn,
    Negotiation,
    Runtime,
    Timeout,
    Internal,
}

impl Error {
    /// Create a validation error from any displayable type.
    pub fn validation(msg: impl std::fmt::Display) -> Self {
        Self::Validation(msg.to_string())
    }

    /// Create a spawn error from any displayable type.
    pub fn spawn(msg: impl std::fmt::Display) -> Self {
        Self::Spawn(msg.to_string())
    }

    /// Create a negotiation error from any displayable type.
    pub fn negotiation(msg: impl std::fmt::Display) -> Self {
        Self::Negotiation(msg.to_string())
    }

    /// Create a runtime error from any displayable type.
    pub fn runtime(msg: impl std::fmt::Display) -> Self {
        Self::Runtime(msg.to_string())
    }

    /// Create a timeout error from any displayable type.
    pub fn timeout(msg: impl std::fmt::Display) -> Self {
        Self::Timeout(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create an HTTP error from any displayable type.
    pub fn http(msg: impl std::fmt::Display) -> Self {
        Self::Http(msg.to_string())
    }

    /// Create an internal error from any displayable type.
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Self::Internal(msg.to_string())
    }

    /// Rebuild an error from its discriminator and message, e.g. to hand one
    /// outcome to several callers.
    pub fn from_kind(kind: ErrorKind, msg: impl std::fmt::Display) -> Self {
        match kind {
            ErrorKind::Validation => Self::validation(msg),
            ErrorKind::Spawn => Self::spawn(msg),
            ErrorKind::Negotiation => Self::negotiation(msg),
            ErrorKind::Runtime => Self::runtime(msg),
            ErrorKind::Timeout => Self::timeout(msg),
            ErrorKind::Internal => Self::internal(msg),
        }
    }

    /// Reduce this error to its discriminator.
    ///
    /// HTTP failures only ever surface from the signaling exchange, so they
    /// count as negotiation failures. Local I/O and configuration problems
    /// block the process from starting and count as spawn failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Spawn(_) | Self::Io(_) | Self::Config(_) => ErrorKind::Spawn,
            Self::Negotiation(_) | Self::Http(_) => ErrorKind::Negotiation,
            Self::Runtime(_) => ErrorKind::Runtime,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The human-readable message without the category prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Io(e) => e.to_string(),
            Self::Validation(m)
            | Self::Spawn(m)
            | Self::Negotiation(m)
            | Self::Runtime(m)
            | Self::Timeout(m)
            | Self::Config(m)
            | Self::Http(m)
            | Self::Internal(m) => m.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_groups_transport_errors_with_negotiation() {
        assert_eq!(Error::http("503").kind(), ErrorKind::Negotiation);
        assert_eq!(Error::negotiation("bad sdp").kind(), ErrorKind::Negotiation);
    }

    #[test]
    fn test_kind_groups_local_failures_with_spawn() {
        let io = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(io.kind(), ErrorKind::Spawn);
        assert_eq!(Error::config("bad path").kind(), ErrorKind::Spawn);
    }

    #[test]
    fn test_message_strips_category() {
        let err = Error::timeout("health probe failed");
        assert_eq!(err.message(), "health probe failed");
        assert_eq!(err.to_string(), "timeout: health probe failed");
    }

    #[test]
    fn test_from_kind_keeps_kind_and_message() {
        let original = Error::http("connection refused");
        let copy = Error::from_kind(original.kind(), original.message());
        assert_eq!(copy.kind(), ErrorKind::Negotiation);
        assert_eq!(copy.message(), "connection refused");
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::Negotiation).expect("serialize");
        assert_eq!(json, "\"negotiation\"");
    }
}
