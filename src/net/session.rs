//! Lifecycle of one accepted connection.
//!
//! # State Machine
//! ```text
//! Accepted → Authorizing → Dialing → Relaying → Closing → Closed
//!                 │            │                    ▲
//!                 └────────────┴── rejected/failed ─┘
//! ```
//!
//! # Design Decisions
//! - The decoder and tees are only created once the backend is connected
//! - The first direction to finish ends the session; the other direction
//!   is told to stop, even if its peer still had data to send
//! - A stopped direction first hands every byte it already relayed to its
//!   tee; past the drain timeout it is aborted instead
//! - Connections close by dropping their halves, so a direction that
//!   already failed is never closed twice
//! - Tees are drained after both connections are closed, bounded by the
//!   same drain timeout

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::ProxyConfig;
use crate::decoder::{Decoder, DecoderFactory, Direction};
use crate::dump::{specialize, DecoderTee, DumpSinks, TeeDrain};
use crate::error::SessionError;
use crate::net::connection::ConnectionInfo;
use crate::net::relay::DirectionalRelay;
use crate::observability::metrics;

/// Points where callers can observe or gate a session.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// Runs before the backend is dialed. An error rejects the session.
    async fn on_new_conn(
        &self,
        conn: TcpStream,
        _info: &ConnectionInfo,
    ) -> Result<TcpStream, SessionError> {
        Ok(conn)
    }

    /// Runs once the session's connections are closed.
    async fn on_conn_close(&self, _info: &ConnectionInfo) {}
}

/// Always allow, do nothing on close.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl SessionHooks for NoHooks {}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    Authorizing,
    Dialing,
    Relaying,
    Closing,
    Closed,
}

/// Everything sessions share. Built once at startup.
#[derive(Clone)]
pub struct SessionContext {
    pub backend_addr: String,
    pub connect_timeout: Duration,
    pub decoder_factory: Arc<dyn DecoderFactory>,
    pub sinks: DumpSinks,
    pub hooks: Arc<dyn SessionHooks>,
    pub tee_buffer: usize,
    pub drain_timeout: Duration,
}

impl SessionContext {
    /// A context with no sinks, no hooks and default timeouts.
    pub fn new(backend_addr: impl Into<String>, decoder_factory: Arc<dyn DecoderFactory>) -> Self {
        let defaults = ProxyConfig::default();
        Self {
            backend_addr: backend_addr.into(),
            connect_timeout: defaults.backend.connect_timeout(),
            decoder_factory,
            sinks: DumpSinks::none(),
            hooks: Arc::new(NoHooks),
            tee_buffer: defaults.dump.tee_buffer_bytes,
            drain_timeout: defaults.dump.drain_timeout(),
        }
    }

    /// A context for a validated configuration.
    pub fn from_config(
        config: &ProxyConfig,
        decoder_factory: Arc<dyn DecoderFactory>,
        sinks: DumpSinks,
        hooks: Arc<dyn SessionHooks>,
    ) -> Self {
        Self {
            backend_addr: config.backend.address.clone(),
            connect_timeout: config.backend.connect_timeout(),
            decoder_factory,
            sinks,
            hooks,
            tee_buffer: config.dump.tee_buffer_bytes,
            drain_timeout: config.dump.drain_timeout(),
        }
    }

    pub fn with_sinks(mut self, sinks: DumpSinks) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_tee_buffer(mut self, bytes: usize) -> Self {
        self.tee_buffer = bytes;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("backend_addr", &self.backend_addr)
            .field("connect_timeout", &self.connect_timeout)
            .field("sinks", &self.sinks)
            .field("tee_buffer", &self.tee_buffer)
            .field("drain_timeout", &self.drain_timeout)
            .finish()
    }
}

/// What a completed session relayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub request_bytes: u64,
    pub response_bytes: u64,
    /// The direction whose end triggered teardown.
    pub first_closed: Direction,
    /// Whether every tee flushed before the drain timeout.
    pub dump_flushed: bool,
}

/// Drives one accepted connection through its lifecycle.
pub struct ConnectionSession {
    ctx: Arc<SessionContext>,
    info: ConnectionInfo,
    state: SessionState,
}

impl ConnectionSession {
    pub fn new(ctx: Arc<SessionContext>, info: ConnectionInfo) -> Self {
        Self {
            ctx,
            info,
            state: SessionState::Accepted,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        tracing::debug!(
            connection_id = %self.info.id,
            from = ?self.state,
            to = ?next,
            "Session state change"
        );
        self.state = next;
    }

    /// Run the session to completion. Both connections are closed when this
    /// returns, whatever the outcome.
    pub async fn run(mut self, inbound: TcpStream) -> Result<SessionSummary, SessionError> {
        let result = self.establish(inbound).await;

        self.transition(SessionState::Closing);
        self.ctx.hooks.on_conn_close(&self.info).await;
        self.transition(SessionState::Closed);

        match &result {
            Ok(summary) => {
                metrics::record_session("completed");
                metrics::record_relayed(Direction::Request, summary.request_bytes);
                metrics::record_relayed(Direction::Response, summary.response_bytes);
                tracing::info!(
                    connection_id = %self.info.id,
                    request_bytes = summary.request_bytes,
                    response_bytes = summary.response_bytes,
                    first_closed = %summary.first_closed,
                    "Session closed"
                );
            }
            Err(e) => {
                metrics::record_session(e.kind());
                tracing::warn!(connection_id = %self.info.id, error = %e, "Session ended early");
            }
        }
        result
    }

    async fn establish(&mut self, inbound: TcpStream) -> Result<SessionSummary, SessionError> {
        self.transition(SessionState::Authorizing);
        let inbound = self.ctx.hooks.on_new_conn(inbound, &self.info).await?;

        self.transition(SessionState::Dialing);
        let outbound = self.dial().await?;

        self.transition(SessionState::Relaying);
        Ok(self.relay(inbound, outbound).await)
    }

    async fn dial(&self) -> Result<TcpStream, SessionError> {
        let addr = &self.ctx.backend_addr;
        let timeout = self.ctx.connect_timeout;
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr.as_str())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(SessionError::Dial {
                    addr: addr.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(SessionError::DialTimeout {
                    addr: addr.clone(),
                    timeout,
                })
            }
        };
        let _ = stream.set_nodelay(true);
        tracing::debug!(connection_id = %self.info.id, backend = %addr, "Backend connected");
        Ok(stream)
    }

    fn spawn_tee(
        &self,
        direction: Direction,
        decoder: Option<&Arc<dyn Decoder>>,
        drains: &mut Vec<TeeDrain>,
    ) -> Option<DecoderTee> {
        let decoder = decoder?;
        let sink = self.ctx.sinks.get(direction)?;
        let sink = specialize(sink, &self.info.dump_label());
        let (tee, drain) = DecoderTee::spawn(
            direction,
            Arc::clone(decoder),
            sink,
            self.ctx.tee_buffer,
            self.info.id,
        );
        drains.push(drain);
        Some(tee)
    }

    /// The session's decoder. A factory failure disables dumping in both
    /// directions; the relay runs regardless.
    fn create_decoder(&self) -> Option<Arc<dyn Decoder>> {
        match self.ctx.decoder_factory.create(&self.info) {
            Ok(decoder) => Some(decoder),
            Err(e) => {
                tracing::warn!(connection_id = %self.info.id, error = %e, "Decoder unavailable, dumping disabled");
                metrics::record_dump_error(Direction::Request);
                metrics::record_dump_error(Direction::Response);
                None
            }
        }
    }

    async fn relay(&mut self, inbound: TcpStream, outbound: TcpStream) -> SessionSummary {
        let decoder = self.create_decoder();

        let mut drains = Vec::with_capacity(2);
        let request_tee = self.spawn_tee(Direction::Request, decoder.as_ref(), &mut drains);
        let response_tee = self.spawn_tee(Direction::Response, decoder.as_ref(), &mut drains);
        drop(decoder);

        let (in_read, in_write) = inbound.into_split();
        let (out_read, out_write) = outbound.into_split();

        let (stop_tx, stop_rx) = watch::channel(false);
        let upstream = DirectionalRelay::new(Direction::Request, in_read, out_write, request_tee)
            .with_stop(stop_rx.clone());
        let downstream = DirectionalRelay::new(Direction::Response, out_read, in_write, response_tee)
            .with_stop(stop_rx);
        let request_bytes = upstream.counter();
        let response_bytes = downstream.counter();

        let mut up = tokio::spawn(upstream.run());
        let mut down = tokio::spawn(downstream.run());

        let (first_closed, result) = tokio::select! {
            res = &mut up => (Direction::Request, res),
            res = &mut down => (Direction::Response, res),
        };
        if let Ok(Err(e)) = &result {
            tracing::debug!(connection_id = %self.info.id, direction = %first_closed, error = %e, "Relay error");
        }

        self.transition(SessionState::Closing);
        let _ = stop_tx.send(true);
        let (other_direction, mut other) = match first_closed {
            Direction::Request => (Direction::Response, down),
            Direction::Response => (Direction::Request, up),
        };

        let deadline = Instant::now() + self.ctx.drain_timeout;
        let mut dump_flushed = true;
        if tokio::time::timeout_at(deadline, &mut other).await.is_err() {
            tracing::warn!(
                connection_id = %self.info.id,
                direction = %other_direction,
                "Direction did not stop before the drain timeout, cutting it"
            );
            other.abort();
            let _ = other.await;
            dump_flushed = false;
        }

        for drain in drains {
            let remaining = deadline.saturating_duration_since(Instant::now());
            dump_flushed &= drain.finish(remaining).await;
        }

        SessionSummary {
            request_bytes: request_bytes.load(Ordering::Relaxed),
            response_bytes: response_bytes.load(Ordering::Relaxed),
            first_closed,
            dump_flushed,
        }
    }
}
