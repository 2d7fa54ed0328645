//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// The single backend every session is relayed to.
    pub backend: BackendConfig,

    /// Where captured traffic is written.
    pub dump: DumpConfig,

    /// Decoder applied to captured traffic.
    pub decoder: DecoderConfig,

    /// Optional token handshake.
    pub auth: AuthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent sessions.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend address (e.g., "10.10.1.8:80"). Required.
    pub address: String,

    /// Dial timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl BackendConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            connect_timeout_ms: 3000,
        }
    }
}

/// How dump records are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DumpFormat {
    /// Labeled text on stdout, raw bytes in files.
    #[default]
    Auto,
    /// Labeled header followed by the payload.
    Text,
    /// Labeled header followed by offset/escaped/hex rows.
    Hex,
    /// Payload only.
    Raw,
}

impl std::str::FromStr for DumpFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(DumpFormat::Auto),
            "text" => Ok(DumpFormat::Text),
            "hex" => Ok(DumpFormat::Hex),
            "raw" => Ok(DumpFormat::Raw),
            other => Err(format!("unknown dump format {other:?}")),
        }
    }
}

/// Dump configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DumpConfig {
    /// Request-direction target: "stdout", a file path, or ""/"-" to disable.
    pub request: String,

    /// Response-direction target, same syntax as `request`.
    pub response: String,

    pub format: DumpFormat,

    /// Bytes a tee may buffer before the relay waits on it.
    pub tee_buffer_bytes: usize,

    /// How long session teardown waits for tees to drain, in milliseconds.
    pub drain_timeout_ms: u64,
}

impl DumpConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            request: "stdout".to_string(),
            response: "stdout".to_string(),
            format: DumpFormat::Auto,
            tee_buffer_bytes: 1024 * 1024,
            drain_timeout_ms: 5000,
        }
    }
}

/// Decoder selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Registered decoder name.
    pub name: String,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            name: "nop".to_string(),
        }
    }
}

/// Token handshake configuration. An empty token disables the gate.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub token: String,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` overrides it.
    pub log_level: String,

    /// Compact single-line log output without ANSI colors.
    pub log_compact: bool,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_compact: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
