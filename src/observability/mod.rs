//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters and gauges via `metrics`)
//!
//! Consumers:
//!     → stderr/stdout log output
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Connection id flows through every session log line
//! - Metrics are cheap (atomic increments) and always recorded; the
//!   exporter is only installed when enabled

pub mod logging;
pub mod metrics;
