//! One-way copy loop with an optional dump tee.
//!
//! # Responsibilities
//! - Copy `src` to `dst` until end-of-stream, an I/O error or a stop signal
//! - Fan each chunk out to the direction's `DecoderTee`
//! - Close the tee on every exit path
//!
//! A failed write to `dst` ends the relay. A failed tee write never does.
//! A stop signal is only honored while waiting on `src` or `dst`: bytes that
//! reached `dst` are always handed to the tee first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use crate::decoder::Direction;
use crate::dump::DecoderTee;

/// Read buffer per relay, allocated once.
pub const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// How a relay ended without an I/O error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// `src` reached end-of-stream.
    Eof,
    /// The session asked the relay to stop.
    Stopped,
}

/// Resolve once `stop` holds `true`. Never resolves if the sender is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Copy `src` into `dst`, teeing every chunk.
///
/// `relayed` is advanced as bytes reach `dst`, so the count stays accurate if
/// the relay is stopped.
pub async fn relay<R, W>(
    dst: &mut W,
    src: &mut R,
    mut tee: Option<&mut DecoderTee>,
    relayed: &AtomicU64,
    stop: &mut watch::Receiver<bool>,
) -> std::io::Result<RelayEnd>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = tokio::select! {
            biased;
            _ = stopped(stop) => return Ok(RelayEnd::Stopped),
            res = src.read(&mut buf) => res?,
        };
        if n == 0 {
            dst.flush().await?;
            return Ok(RelayEnd::Eof);
        }

        let mut written = 0;
        while written < n {
            let k = tokio::select! {
                biased;
                _ = stopped(stop) => return Ok(RelayEnd::Stopped),
                res = dst.write(&buf[written..n]) => res?,
            };
            if k == 0 {
                return Err(std::io::ErrorKind::WriteZero.into());
            }
            relayed.fetch_add(k as u64, Ordering::Relaxed);
            if let Some(tee) = tee.as_deref_mut() {
                tee.write(&buf[written..written + k]).await;
            }
            written += k;
        }
    }
}

/// Owns one direction's halves and tee for the lifetime of a session.
#[derive(Debug)]
pub struct DirectionalRelay<R, W> {
    direction: Direction,
    src: R,
    dst: W,
    tee: Option<DecoderTee>,
    relayed: Arc<AtomicU64>,
    stop: watch::Receiver<bool>,
}

impl<R, W> DirectionalRelay<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(direction: Direction, src: R, dst: W, tee: Option<DecoderTee>) -> Self {
        Self {
            direction,
            src,
            dst,
            tee,
            relayed: Arc::new(AtomicU64::new(0)),
            stop: watch::channel(false).1,
        }
    }

    /// Stop at the next read or destination write once `stop` turns `true`.
    pub fn with_stop(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Shared byte counter, readable after the relay is cancelled.
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.relayed)
    }

    /// Run until the source ends, either side fails or a stop is signalled,
    /// then close the tee.
    ///
    /// If the task running this is aborted, dropping the tee closes the pipe.
    pub async fn run(mut self) -> std::io::Result<RelayEnd> {
        let result = relay(
            &mut self.dst,
            &mut self.src,
            self.tee.as_mut(),
            &self.relayed,
            &mut self.stop,
        )
        .await;
        if let Some(tee) = self.tee.as_mut() {
            tee.close().await;
        }
        match &result {
            Ok(RelayEnd::Eof) => tracing::debug!(direction = %self.direction, "Relay reached end of stream"),
            Ok(RelayEnd::Stopped) => tracing::debug!(direction = %self.direction, "Relay stopped"),
            Err(e) => tracing::debug!(direction = %self.direction, error = %e, "Relay ended with I/O error"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::NopDecoder;
    use crate::dump::{DumpSink, MemorySink};
    use crate::net::connection::ConnectionId;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    /// Accepts nothing.
    struct BrokenWriter;

    impl AsyncWrite for BrokenWriter {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct FailingSink;

    #[async_trait::async_trait]
    impl DumpSink for FailingSink {
        async fn write(&self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }
    }

    #[tokio::test]
    async fn copies_and_tees_until_eof() {
        let sink = Arc::new(MemorySink::new());
        let (tee, drain) = DecoderTee::spawn(
            Direction::Request,
            Arc::new(NopDecoder),
            sink.clone(),
            1024,
            ConnectionId::new(),
        );
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut dst = Vec::new();

        let relay = DirectionalRelay::new(Direction::Request, payload.as_slice(), &mut dst, Some(tee));
        let counter = relay.counter();
        assert_eq!(relay.run().await.unwrap(), RelayEnd::Eof);

        assert!(drain.finish(Duration::from_secs(5)).await);
        assert_eq!(dst, payload);
        assert_eq!(sink.contents(), payload);
        assert_eq!(counter.load(Ordering::Relaxed), payload.len() as u64);
    }

    #[tokio::test]
    async fn destination_failure_is_returned() {
        let relayed = AtomicU64::new(0);
        let mut src: &[u8] = b"data";
        let (_tx, mut stop) = watch::channel(false);
        let err = relay(&mut BrokenWriter, &mut src, None, &relayed, &mut stop)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
        assert_eq!(relayed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn sink_failure_does_not_stop_relay() {
        let (tee, drain) = DecoderTee::spawn(
            Direction::Response,
            Arc::new(NopDecoder),
            Arc::new(FailingSink),
            4,
            ConnectionId::new(),
        );
        let payload = vec![7u8; 64 * 1024];
        let mut dst = Vec::new();

        DirectionalRelay::new(Direction::Response, payload.as_slice(), &mut dst, Some(tee))
            .run()
            .await
            .unwrap();

        assert_eq!(dst, payload);
        assert!(drain.finish(Duration::from_secs(5)).await);
    }

    /// Holds every write until the gate is opened.
    struct GatedSink {
        gate: tokio::sync::Semaphore,
        inner: MemorySink,
    }

    #[async_trait::async_trait]
    impl DumpSink for GatedSink {
        async fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
            let _open = self.gate.acquire().await.map_err(std::io::Error::other)?;
            self.inner.write(buf).await
        }
    }

    #[tokio::test]
    async fn stop_ends_idle_relay() {
        let (_client, src) = tokio::io::duplex(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        let relay = DirectionalRelay::new(Direction::Request, src, Vec::new(), None).with_stop(stop_rx);
        let task = tokio::spawn(relay.run());

        stop_tx.send(true).unwrap();
        let end = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(end, RelayEnd::Stopped);
    }

    #[tokio::test]
    async fn stop_waits_until_relayed_bytes_are_teed() {
        let sink = Arc::new(GatedSink {
            gate: tokio::sync::Semaphore::new(0),
            inner: MemorySink::new(),
        });
        let (tee, drain) = DecoderTee::spawn(
            Direction::Request,
            Arc::new(NopDecoder),
            sink.clone(),
            16,
            ConnectionId::new(),
        );
        let (mut client, src) = tokio::io::duplex(4096);
        client.write_all(&[b'x'; 1000]).await.unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let relay = DirectionalRelay::new(Direction::Request, src, Vec::new(), Some(tee)).with_stop(stop_rx);
        let counter = relay.counter();
        let task = tokio::spawn(relay.run());

        while counter.load(Ordering::Relaxed) < 1000 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // The tee is full and the sink is held: the relay is parked on the tee.
        stop_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        sink.gate.add_permits(1);
        assert_eq!(task.await.unwrap().unwrap(), RelayEnd::Stopped);
        assert!(drain.finish(Duration::from_secs(5)).await);
        assert_eq!(sink.inner.contents(), vec![b'x'; 1000]);
        drop(client);
    }
}
