//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;

use proxydump::dump::DumpSink;
use proxydump::net::Listener;
use proxydump::{Acceptor, SessionContext, Shutdown};

/// Start a backend that echoes every byte back until the client closes.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rd, mut wr) = socket.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    addr
}

/// Start a backend that reads `expect` bytes, answers with `response` and
/// closes.
pub async fn start_scripted_backend(expect: usize, response: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; expect];
                if socket.read_exact(&mut buf).await.is_ok() {
                    let _ = socket.write_all(response).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start a backend that only counts accepted connections and holds them open.
pub async fn start_counting_backend() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&accepted);

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            count.fetch_add(1, Ordering::SeqCst);
            held.push(socket);
        }
    });
    (addr, accepted)
}

/// A listener that never accepts, its backlog filled so that further
/// connection attempts stall in the handshake.
pub struct Blackhole {
    pub addr: SocketAddr,
    _listener: TcpListener,
    fillers: Vec<JoinHandle<()>>,
}

impl Drop for Blackhole {
    fn drop(&mut self) {
        for filler in &self.fillers {
            filler.abort();
        }
    }
}

pub async fn start_blackhole_backend() -> Blackhole {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(1).unwrap();
    let addr = listener.local_addr().unwrap();

    let fillers = (0..8)
        .map(|_| {
            tokio::spawn(async move {
                let connect = TcpStream::connect(addr);
                if let Ok(Ok(_held)) = tokio::time::timeout(Duration::from_secs(30), connect).await {
                    std::future::pending::<()>().await;
                }
            })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(200)).await;

    Blackhole {
        addr,
        _listener: listener,
        fillers,
    }
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// A running proxy bound to an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl TestProxy {
    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.unwrap()
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start an acceptor for `ctx` on 127.0.0.1.
pub async fn start_proxy(ctx: SessionContext) -> TestProxy {
    let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = inner.local_addr().unwrap();
    let acceptor = Acceptor::new(Listener::from_tcp(inner, 64), Arc::new(ctx));
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = acceptor.serve(rx).await;
    });
    TestProxy { addr, shutdown }
}

/// Read until the peer closes, failing the test after `limit`.
pub async fn read_all(stream: &mut TcpStream, limit: Duration) -> Vec<u8> {
    let mut out = Vec::new();
    tokio::time::timeout(limit, stream.read_to_end(&mut out))
        .await
        .expect("peer did not close in time")
        .unwrap();
    out
}

/// Poll `cond` every 10ms until it holds or `limit` passes.
pub async fn eventually(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// A sink that takes `delay` per write and counts bytes it has seen.
#[derive(Debug)]
pub struct SlowSink {
    pub delay: Duration,
    pub bytes: AtomicUsize,
}

impl SlowSink {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            bytes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DumpSink for SlowSink {
    async fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        tokio::time::sleep(self.delay).await;
        self.bytes.fetch_add(buf.len(), Ordering::SeqCst);
        Ok(buf.len())
    }
}
