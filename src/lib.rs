//! Transparent TCP relay that dumps a decoded copy of each direction's traffic.

pub mod auth;
pub mod config;
pub mod decoder;
pub mod dump;
pub mod error;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use decoder::{Decoder, DecoderFactory, DecoderRegistry, Direction, NopDecoder};
pub use dump::{DecoderTee, DumpSink, DumpSinks};
pub use error::{ConfigError, ListenerError, SessionError};
pub use lifecycle::Shutdown;
pub use net::{Acceptor, ConnectionSession, SessionContext, SessionHooks};
