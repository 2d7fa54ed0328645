//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → session.rs (hooks, backend dial, teardown)
//!     → relay.rs ×2 (client → backend, backend → client)
//!         └─ side copy → dump::DecoderTee
//!
//! Session States:
//!     Accepted → Authorizing → Dialing → Relaying → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - One task per session, one per relay direction
//! - Sessions are independent; only dump destinations are shared
//! - The first direction to end tears down the whole session

pub mod connection;
pub mod listener;
pub mod relay;
pub mod session;

pub use connection::{ConnectionId, ConnectionInfo, ConnectionTracker};
pub use listener::{Acceptor, Listener};
pub use relay::{DirectionalRelay, RelayEnd};
pub use session::{ConnectionSession, NoHooks, SessionContext, SessionHooks, SessionState, SessionSummary};
