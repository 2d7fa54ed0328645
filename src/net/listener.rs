//! TCP listener and accept loop.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//! - Hand each connection to its own session task
//! - Graceful handling of accept errors

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};
use tracing::Instrument;

use crate::config::ListenerConfig;
use crate::error::ListenerError;
use crate::net::connection::{ConnectionInfo, ConnectionTracker};
use crate::net::session::{ConnectionSession, SessionContext};
use crate::observability::metrics;

/// Pause after a transient accept error, so a persistent condition such as
/// descriptor exhaustion does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// A bounded TCP listener that limits concurrent sessions.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// accepting waits until a session ends.
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind(config.bind_address.as_str())
            .await
            .map_err(ListenerError::Bind)?;
        let listener = Self::from_tcp(listener, config.max_connections);

        tracing::info!(
            address = %listener.local_addr().map_err(ListenerError::Bind)?,
            max_connections = config.max_connections,
            "Listener bound"
        );
        Ok(listener)
    }

    /// Wrap an already bound listener.
    pub fn from_tcp(inner: TcpListener, max_connections: usize) -> Self {
        Self {
            inner,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// Returns the stream and a permit that must be held for the session's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

/// Whether the listener can keep accepting after `e`.
pub fn is_transient_accept_error(e: &std::io::Error) -> bool {
    !matches!(
        e.kind(),
        std::io::ErrorKind::InvalidInput | std::io::ErrorKind::Unsupported
    )
}

/// The top-level accept loop.
pub struct Acceptor {
    listener: Listener,
    ctx: Arc<SessionContext>,
    tracker: ConnectionTracker,
}

impl Acceptor {
    pub fn new(listener: Listener, ctx: Arc<SessionContext>) -> Self {
        Self {
            listener,
            ctx,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Live session counter, for draining on shutdown.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Accept until shutdown is signalled or the listener fails for good.
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ListenerError> {
        tracing::info!(backend = %self.ctx.backend_addr, "Accepting connections");
        loop {
            let accepted = tokio::select! {
                res = self.listener.accept() => res,
                _ = shutdown.recv() => {
                    tracing::info!("Acceptor received shutdown signal");
                    return Ok(());
                }
            };

            match accepted {
                Ok((stream, peer_addr, permit)) => self.spawn_session(stream, peer_addr, permit),
                Err(ListenerError::Accept(e)) if is_transient_accept_error(&e) => {
                    metrics::record_accept_error();
                    tracing::warn!(error = %e, "Accept failed, continuing");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Listener failed");
                    return Err(e);
                }
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, peer_addr: SocketAddr, permit: ConnectionPermit) {
        let local_addr = stream.local_addr().unwrap_or(peer_addr);
        let info = ConnectionInfo::new(peer_addr, local_addr);
        let span = tracing::info_span!("session", connection_id = %info.id, peer_addr = %peer_addr);
        let guard = self.tracker.track();
        let ctx = Arc::clone(&self.ctx);

        tokio::spawn(
            async move {
                let _permit = permit;
                let _guard = guard;
                let _ = ConnectionSession::new(ctx, info).run(stream).await;
            }
            .instrument(span),
        );
    }
}
