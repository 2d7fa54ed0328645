//! Token gate run before a session dials the backend.
//!
//! # Protocol
//! ```text
//! client IP already authenticated?  → allowed, no handshake
//! otherwise client sends "<token>\n"
//!     match    → "auth success", IP remembered, session continues
//!     mismatch → "forbidden", session rejected
//! ```
//!
//! The token line is read byte by byte so no payload that follows it is
//! consumed before the relay starts.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::SessionError;
use crate::net::connection::ConnectionInfo;
use crate::net::session::SessionHooks;

/// Longest token line accepted, newline excluded.
pub const MAX_TOKEN_LINE: usize = 256;

/// How long a client has to send its token.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub const AUTH_SUCCESS: &[u8] = b"auth success";
pub const FORBIDDEN: &[u8] = b"forbidden";

/// Session hooks that log connection open/close and, when a token is set,
/// gate unknown client IPs behind it.
#[derive(Debug, Default)]
pub struct TokenGate {
    token: String,
    hosts: DashMap<IpAddr, Instant>,
}

impl TokenGate {
    /// An empty token disables the handshake.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            hosts: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.token.is_empty()
    }

    /// Whether `ip` has already authenticated.
    pub fn is_allowed(&self, ip: &IpAddr) -> bool {
        self.hosts.contains_key(ip)
    }

    /// When `ip` authenticated, if it has.
    pub fn authenticated_at(&self, ip: &IpAddr) -> Option<Instant> {
        self.hosts.get(ip).map(|entry| *entry.value())
    }

    async fn handshake(&self, conn: &mut TcpStream, ip: IpAddr) -> Result<(), SessionError> {
        let line = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_line(conn))
            .await
            .map_err(|_| SessionError::Unauthorized(format!("{ip} sent no token in time")))?
            .map_err(SessionError::Hook)?;

        if line.as_deref() == Some(self.token.as_bytes()) {
            self.hosts.insert(ip, Instant::now());
            tracing::info!(client = %ip, "Auth success");
            conn.write_all(AUTH_SUCCESS).await.map_err(SessionError::Hook)?;
            Ok(())
        } else {
            tracing::warn!(client = %ip, "Forbidden, not authenticated");
            let _ = conn.write_all(FORBIDDEN).await;
            Err(SessionError::Unauthorized(format!("{ip} sent a wrong token")))
        }
    }
}

/// Read up to and including a newline or end-of-stream, returning the line
/// without its ending. `None` when the line runs past `MAX_TOKEN_LINE`
/// bytes.
async fn read_line(conn: &mut TcpStream) -> std::io::Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if conn.read(&mut byte).await? == 0 || byte[0] == b'\n' {
            break;
        }
        if line.len() == MAX_TOKEN_LINE {
            return Ok(None);
        }
        line.push(byte[0]);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Some(line))
}

#[async_trait]
impl SessionHooks for TokenGate {
    async fn on_new_conn(
        &self,
        mut conn: TcpStream,
        info: &ConnectionInfo,
    ) -> Result<TcpStream, SessionError> {
        tracing::info!(connection_id = %info.id, "conn {} open", info.peer_addr);

        let ip = info.peer_addr.ip();
        if self.is_enabled() && !self.is_allowed(&ip) {
            self.handshake(&mut conn, ip).await?;
        }
        Ok(conn)
    }

    async fn on_conn_close(&self, info: &ConnectionInfo) {
        tracing::info!(connection_id = %info.id, "conn {} closed", info.peer_addr);
    }
}
