//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxydump_sessions_total` (counter): finished sessions by outcome
//! - `proxydump_active_sessions` (gauge): sessions currently open
//! - `proxydump_relayed_bytes_total` (counter): bytes forwarded by direction
//! - `proxydump_dump_errors_total` (counter): dump-path failures by direction
//! - `proxydump_accept_errors_total` (counter): transient accept failures

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::decoder::Direction;

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_session(outcome: &'static str) {
    metrics::counter!("proxydump_sessions_total", "outcome" => outcome).increment(1);
}

pub fn set_active_sessions(active: u64) {
    metrics::gauge!("proxydump_active_sessions").set(active as f64);
}

pub fn record_relayed(direction: Direction, bytes: u64) {
    metrics::counter!("proxydump_relayed_bytes_total", "direction" => direction.as_str())
        .increment(bytes);
}

pub fn record_dump_error(direction: Direction) {
    metrics::counter!("proxydump_dump_errors_total", "direction" => direction.as_str())
        .increment(1);
}

pub fn record_accept_error() {
    metrics::counter!("proxydump_accept_errors_total").increment(1);
}
