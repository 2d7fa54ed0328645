//! Buffer-at-a-time decoders.

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use super::{DecodeInput, Decoder, Direction, RecordWriter, DECODE_BUFFER_SIZE};
use crate::dump::DumpSink;

/// A decoder that transforms one captured chunk at a time.
///
/// Chunk boundaries follow the relay's reads and carry no protocol meaning.
/// An implementation that holds bytes back across calls must return them
/// from `flush` once the stream ends.
pub trait ChunkDecoder: Send + Sync {
    fn request(&self, chunk: &[u8]) -> Vec<u8>;

    fn response(&self, chunk: &[u8]) -> Vec<u8>;

    fn flush(&self, _direction: Direction) -> Vec<u8> {
        Vec::new()
    }
}

/// Runs a `ChunkDecoder` over the stream contract.
#[derive(Debug, Clone, Default)]
pub struct ChunkAdapter<D>(pub D);

impl<D: ChunkDecoder> ChunkAdapter<D> {
    pub fn new(inner: D) -> Self {
        Self(inner)
    }

    async fn run(
        &self,
        direction: Direction,
        input: &mut DecodeInput,
        out: &dyn DumpSink,
    ) -> std::io::Result<()> {
        let mut buf = vec![0u8; DECODE_BUFFER_SIZE];
        let mut records = RecordWriter::new(direction, out);
        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let decoded = match direction {
                Direction::Request => self.0.request(&buf[..n]),
                Direction::Response => self.0.response(&buf[..n]),
            };
            if !decoded.is_empty() {
                records.write(&decoded).await;
            }
        }

        let rest = self.0.flush(direction);
        if !rest.is_empty() {
            records.write(&rest).await;
        }
        records.finish();
        Ok(())
    }
}

#[async_trait]
impl<D: ChunkDecoder> Decoder for ChunkAdapter<D> {
    async fn request(&self, input: &mut DecodeInput, out: &dyn DumpSink) -> std::io::Result<()> {
        self.run(Direction::Request, input, out).await
    }

    async fn response(&self, input: &mut DecodeInput, out: &dyn DumpSink) -> std::io::Result<()> {
        self.run(Direction::Response, input, out).await
    }
}
