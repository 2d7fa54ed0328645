//! proxydump
//!
//! A transparent TCP relay that forwards bytes between clients and one fixed
//! backend, dumping a decoded copy of each direction.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ Acceptor ──▶ ConnectionSession ──dial──▶ Backend
//!                               │
//!                 ┌─────────────┴──────────────┐
//!                 ▼                            ▼
//!          relay (request)              relay (response)
//!        client → backend              backend → client
//!                 │ side copy                  │ side copy
//!                 ▼                            ▼
//!          DecoderTee (pipe)            DecoderTee (pipe)
//!                 │                            │
//!          Decoder::request             Decoder::response
//!                 ▼                            ▼
//!            DumpSink (req)              DumpSink (resp)
//!                 └──────── shared stdout / file ┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use proxydump::auth::TokenGate;
use proxydump::config::loader::read_config;
use proxydump::config::validation::validate_config;
use proxydump::config::{DumpFormat, ProxyConfig};
use proxydump::lifecycle::signals::spawn_signal_handler;
use proxydump::net::Listener;
use proxydump::observability::{logging, metrics};
use proxydump::{Acceptor, ConfigError, DecoderRegistry, DumpSinks, SessionContext, Shutdown};

/// How long live sessions may run on after the acceptor stops.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug, Default)]
#[command(name = "proxydump", version)]
#[command(about = "TCP relay that dumps request and response traffic", long_about = None)]
struct Cli {
    /// TOML configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Backend address (e.g. "10.10.1.8:80")
    #[arg(long)]
    dest: Option<String>,

    /// Request dump target: "stdout", a file path, or "-" to disable
    #[arg(long)]
    req_dump: Option<String>,

    /// Response dump target: "stdout", a file path, or "-" to disable
    #[arg(long)]
    resp_dump: Option<String>,

    /// Registered decoder name
    #[arg(long)]
    decoder: Option<String>,

    /// Require clients to send this token before relaying
    #[arg(long)]
    token: Option<String>,

    /// Dump format: auto, text, hex or raw
    #[arg(long)]
    format: Option<DumpFormat>,

    /// Backend dial timeout in milliseconds
    #[arg(long)]
    connect_timeout_ms: Option<u64>,
}

impl Cli {
    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(listen) = &self.listen {
            config.listener.bind_address = listen.clone();
        }
        if let Some(dest) = &self.dest {
            config.backend.address = dest.clone();
        }
        if let Some(req_dump) = &self.req_dump {
            config.dump.request = req_dump.clone();
        }
        if let Some(resp_dump) = &self.resp_dump {
            config.dump.response = resp_dump.clone();
        }
        if let Some(decoder) = &self.decoder {
            config.decoder.name = decoder.clone();
        }
        if let Some(token) = &self.token {
            config.auth.token = token.clone();
        }
        if let Some(format) = self.format {
            config.dump.format = format;
        }
        if let Some(timeout) = self.connect_timeout_ms {
            config.backend.connect_timeout_ms = timeout;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => ProxyConfig::default(),
    };
    cli.apply(&mut config);

    logging::init_logging(&config.observability);
    validate_config(&config).map_err(ConfigError::Validation)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listener.bind_address,
        backend = %config.backend.address,
        decoder = %config.decoder.name,
        request_dump = %config.dump.request,
        response_dump = %config.dump.response,
        auth = !config.auth.token.is_empty(),
        "proxydump starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let factory = DecoderRegistry::with_builtins().resolve(&config.decoder.name)?;
    let sinks = DumpSinks::open(&config.dump).await?;
    let hooks = Arc::new(TokenGate::new(config.auth.token.clone()));
    let ctx = Arc::new(SessionContext::from_config(&config, factory, sinks, hooks));

    let listener = Listener::bind(&config.listener).await?;
    let acceptor = Acceptor::new(listener, ctx);
    let tracker = acceptor.tracker();

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());
    acceptor.serve(shutdown.subscribe()).await?;

    if !tracker.wait_idle(SHUTDOWN_GRACE).await {
        tracing::warn!(active_sessions = tracker.active_count(), "Sessions still open at exit");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_values() {
        let cli = Cli::parse_from([
            "proxydump",
            "-l",
            "127.0.0.1:7000",
            "--dest",
            "10.0.0.2:80",
            "--req-dump",
            "-",
            "--format",
            "hex",
        ]);
        let mut config = ProxyConfig::default();
        config.dump.response = "resp.log".to_string();
        cli.apply(&mut config);

        assert_eq!(config.listener.bind_address, "127.0.0.1:7000");
        assert_eq!(config.backend.address, "10.0.0.2:80");
        assert_eq!(config.dump.request, "-");
        assert_eq!(config.dump.response, "resp.log");
        assert_eq!(config.dump.format, DumpFormat::Hex);
        assert!(validate_config(&config).is_ok());
    }
}
