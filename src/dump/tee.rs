//! Asynchronous decode-and-dump side path for one relay direction.
//!
//! # Responsibilities
//! - Give the relay a write-only surface that never fails the relay
//! - Run the decoder over the captured stream on its own task
//! - Release the pipe on every exit path and bound how long teardown waits
//!
//! The relay owns the `DecoderTee` (the pipe's write end). The session
//! keeps the `TeeDrain` (the decode task) and settles it after both
//! connections are closed.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use super::DumpSink;
use crate::decoder::{Decoder, Direction};
use crate::net::connection::ConnectionId;
use crate::observability::metrics;

/// Write end of a tee. Dropping it closes the pipe like `close` does.
#[derive(Debug)]
pub struct DecoderTee {
    writer: Option<DuplexStream>,
    direction: Direction,
    conn: ConnectionId,
}

/// The background decode task of a tee.
#[derive(Debug)]
pub struct TeeDrain {
    handle: JoinHandle<()>,
    direction: Direction,
    conn: ConnectionId,
}

impl DecoderTee {
    /// Start a decode task for `direction` and return both ends.
    ///
    /// The pipe buffers up to `buffer` bytes; past that, `write` waits for
    /// the decoder to catch up.
    pub fn spawn(
        direction: Direction,
        decoder: Arc<dyn Decoder>,
        sink: Arc<dyn DumpSink>,
        buffer: usize,
        conn: ConnectionId,
    ) -> (DecoderTee, TeeDrain) {
        let (writer, mut reader) = tokio::io::duplex(buffer);

        let handle = tokio::spawn(async move {
            match decoder.decode(direction, &mut reader, sink.as_ref()).await {
                Ok(()) => {
                    tracing::trace!(connection_id = %conn, direction = %direction, "Decoder finished");
                }
                Err(e) => {
                    metrics::record_dump_error(direction);
                    tracing::warn!(
                        connection_id = %conn,
                        direction = %direction,
                        error = %e,
                        "Decoder failed, dump for this direction stopped"
                    );
                }
            }
        });

        let tee = DecoderTee {
            writer: Some(writer),
            direction,
            conn,
        };
        let drain = TeeDrain {
            handle,
            direction,
            conn,
        };
        (tee, drain)
    }

    /// Hand a copy of relayed bytes to the decoder.
    ///
    /// A failed write closes the tee; later writes are ignored.
    pub async fn write(&mut self, buf: &[u8]) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(e) = writer.write_all(buf).await {
            metrics::record_dump_error(self.direction);
            tracing::warn!(
                connection_id = %self.conn,
                direction = %self.direction,
                error = %e,
                "Dump pipe closed, detaching tee"
            );
            self.writer = None;
        }
    }

    /// Signal end-of-stream to the decoder. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }
}

impl TeeDrain {
    /// Wait for the decoder to flush what the tee buffered.
    ///
    /// The tee must already be closed or dropped. Past `timeout` the task is
    /// aborted and whatever it still buffered is discarded. Returns `true`
    /// when everything was flushed.
    pub async fn finish(mut self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(_) => true,
            Err(_) => {
                self.handle.abort();
                metrics::record_dump_error(self.direction);
                tracing::warn!(
                    connection_id = %self.conn,
                    direction = %self.direction,
                    timeout = ?timeout,
                    "Dump drain timed out, discarding buffered bytes"
                );
                false
            }
        }
    }
}
