//! Pluggable transforms applied to captured traffic.
//!
//! # Data Flow
//! ```text
//! DecoderTee pipe (request side)  → Decoder::request  → DumpSink
//! DecoderTee pipe (response side) → Decoder::response → DumpSink
//! ```
//!
//! # Design Decisions
//! - One decoder instance per session, created by a `DecoderFactory` and
//!   shared by that session's two tees; never shared across sessions
//! - Each operation consumes an unbounded byte stream and must eventually
//!   emit everything it consumed, in order
//! - Decoders that think in whole buffers implement `ChunkDecoder` and are
//!   wrapped in `ChunkAdapter`
//! - Factories are resolved by name through `DecoderRegistry` at startup

pub mod chunk;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::dump::DumpSink;
use crate::error::DecoderError;
use crate::net::connection::ConnectionInfo;
use crate::observability::metrics;

pub use chunk::{ChunkAdapter, ChunkDecoder};
pub use registry::DecoderRegistry;

/// Read buffer size for decoders that stream input to a sink.
pub const DECODE_BUFFER_SIZE: usize = 32 * 1024;

/// Traffic direction through the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client → backend.
    Request,
    /// Backend → client.
    Response,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Request => "req",
            Direction::Response => "resp",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input stream handed to a decoder. Ends when the tee is closed.
pub type DecodeInput = dyn AsyncRead + Send + Unpin;

/// A per-session transform over each direction's captured bytes.
#[async_trait]
pub trait Decoder: Send + Sync {
    /// Consume the request stream until end-of-stream, writing results to `out`.
    async fn request(&self, input: &mut DecodeInput, out: &dyn DumpSink) -> std::io::Result<()>;

    /// Consume the response stream until end-of-stream, writing results to `out`.
    async fn response(&self, input: &mut DecodeInput, out: &dyn DumpSink) -> std::io::Result<()>;

    /// Dispatch to the operation for `direction`.
    async fn decode(
        &self,
        direction: Direction,
        input: &mut DecodeInput,
        out: &dyn DumpSink,
    ) -> std::io::Result<()> {
        match direction {
            Direction::Request => self.request(input, out).await,
            Direction::Response => self.response(input, out).await,
        }
    }
}

/// Builds the decoder for one accepted connection.
pub trait DecoderFactory: Send + Sync {
    fn create(&self, conn: &ConnectionInfo) -> Result<Arc<dyn Decoder>, DecoderError>;
}

impl<F> DecoderFactory for F
where
    F: Fn(&ConnectionInfo) -> Result<Arc<dyn Decoder>, DecoderError> + Send + Sync,
{
    fn create(&self, conn: &ConnectionInfo) -> Result<Arc<dyn Decoder>, DecoderError> {
        self(conn)
    }
}

/// Identity transform: every chunk read is written to the sink unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopDecoder;

#[async_trait]
impl Decoder for NopDecoder {
    async fn request(&self, input: &mut DecodeInput, out: &dyn DumpSink) -> std::io::Result<()> {
        copy_to_sink(Direction::Request, input, out).await.map(|_| ())
    }

    async fn response(&self, input: &mut DecodeInput, out: &dyn DumpSink) -> std::io::Result<()> {
        copy_to_sink(Direction::Response, input, out).await.map(|_| ())
    }
}

/// Factory for `NopDecoder`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopDecoderFactory;

impl DecoderFactory for NopDecoderFactory {
    fn create(&self, _conn: &ConnectionInfo) -> Result<Arc<dyn Decoder>, DecoderError> {
        Ok(Arc::new(NopDecoder))
    }
}

/// Copy `input` to `out` until end-of-stream, one sink record per read.
///
/// A failed sink write drops that record and copying goes on. Returns the
/// number of bytes the sink accepted.
pub async fn copy_to_sink(
    direction: Direction,
    input: &mut DecodeInput,
    out: &dyn DumpSink,
) -> std::io::Result<u64> {
    let mut buf = vec![0u8; DECODE_BUFFER_SIZE];
    let mut records = RecordWriter::new(direction, out);
    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            return Ok(records.finish());
        }
        records.write(&buf[..n]).await;
    }
}

/// Best-effort record writer for one direction's dump stream.
///
/// Failed writes are counted and logged; one summary warning is logged when
/// the stream ends.
pub struct RecordWriter<'a> {
    direction: Direction,
    out: &'a dyn DumpSink,
    written: u64,
    dropped: u64,
}

impl<'a> RecordWriter<'a> {
    pub fn new(direction: Direction, out: &'a dyn DumpSink) -> Self {
        Self {
            direction,
            out,
            written: 0,
            dropped: 0,
        }
    }

    /// Write one record. Returns whether the sink accepted it.
    pub async fn write(&mut self, record: &[u8]) -> bool {
        match self.out.write(record).await {
            Ok(_) => {
                self.written += record.len() as u64;
                true
            }
            Err(e) => {
                self.dropped += 1;
                metrics::record_dump_error(self.direction);
                tracing::debug!(direction = %self.direction, error = %e, len = record.len(), "Dump write failed, record dropped");
                false
            }
        }
    }

    /// Bytes accepted so far. Logs a warning if any record was dropped.
    pub fn finish(self) -> u64 {
        if self.dropped > 0 {
            tracing::warn!(direction = %self.direction, dropped = self.dropped, "Dump records dropped after sink failures");
        }
        self.written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::MemorySink;

    #[tokio::test]
    async fn nop_decoder_copies_both_directions() {
        let sink = MemorySink::new();
        let mut req: &[u8] = b"GET / HTTP/1.1\r\n\r\n";
        let mut resp: &[u8] = b"HTTP/1.1 204 No Content\r\n\r\n";

        NopDecoder.request(&mut req, &sink).await.unwrap();
        NopDecoder.decode(Direction::Response, &mut resp, &sink).await.unwrap();

        assert_eq!(
            sink.contents(),
            b"GET / HTTP/1.1\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n".to_vec()
        );
    }

    /// Fails its first write, then records.
    #[derive(Default)]
    struct FlakySink {
        failed: std::sync::atomic::AtomicBool,
        inner: MemorySink,
    }

    #[async_trait]
    impl DumpSink for FlakySink {
        async fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(std::io::Error::other("disk busy"));
            }
            self.inner.write(buf).await
        }
    }

    #[tokio::test]
    async fn sink_failure_drops_one_record_and_continues() {
        let sink = FlakySink::default();
        let (mut tx, mut rx) = tokio::io::duplex(64);

        let copy = async {
            copy_to_sink(Direction::Request, &mut rx, &sink).await.unwrap()
        };
        let feed = async {
            use tokio::io::AsyncWriteExt;
            tx.write_all(b"first").await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            tx.write_all(b"second").await.unwrap();
            drop(tx);
        };
        let (dumped, ()) = tokio::join!(copy, feed);

        assert_eq!(dumped, 6);
        assert_eq!(sink.inner.contents(), b"second".to_vec());
    }

    #[test]
    fn closures_are_factories() {
        let factory = |_: &ConnectionInfo| -> Result<Arc<dyn Decoder>, DecoderError> {
            Ok(Arc::new(NopDecoder))
        };
        assert!(factory.create(&ConnectionInfo::probe()).is_ok());
    }

    #[test]
    fn direction_labels() {
        assert_eq!(Direction::Request.to_string(), "req");
        assert_eq!(Direction::Response.as_str(), "resp");
    }
}
