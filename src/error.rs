//! Error taxonomy.
//!
//! # Layers
//! - `ConfigError`: startup only, never reaches a session
//! - `SessionError`: ends one session early, logged, never reaches the acceptor
//! - `ListenerError`: transient accept errors are retried, the rest end `serve`
//! - `DecoderError`: returned by decoder factories
//!
//! Relay I/O errors stay `std::io::Error`; they are the normal way a
//! connection ends.

use std::time::Duration;

use crate::config::validation::ValidationError;

/// Configuration-time failures. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("unknown decoder {0:?}")]
    UnknownDecoder(String),

    #[error("decoder {name:?} rejected probe connection: {source}")]
    DecoderProbe {
        name: String,
        #[source]
        source: DecoderError,
    },

    #[error("cannot open dump destination {path:?}: {source}")]
    DumpOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure raised by a decoder factory.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct DecoderError(pub String);

impl DecoderError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Reasons a single session ends before relaying starts.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connection not authorized: {0}")]
    Unauthorized(String),

    #[error("dial {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dial {addr} timed out after {timeout:?}")]
    DialTimeout { addr: String, timeout: Duration },

    #[error("connection hook failed: {0}")]
    Hook(#[source] std::io::Error),
}

impl SessionError {
    /// Short label used for logs and the `outcome` metric.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Unauthorized(_) => "unauthorized",
            SessionError::Dial { .. } | SessionError::DialTimeout { .. } => "dial_failed",
            SessionError::Hook(_) => "hook_failed",
        }
    }
}

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Failed to bind: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Failed to accept: {0}")]
    Accept(#[source] std::io::Error),

    #[error("connection limit closed")]
    Closed,
}
