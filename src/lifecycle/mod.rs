//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Resolve decoder → Open dumps → Bind → Accept
//!
//! Shutdown:
//!     Signal received (signals.rs) → shutdown.rs broadcast
//!     → Acceptor stops → live sessions drain (bounded) → Exit
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Shutdown has timeout: forced exit after deadline

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
