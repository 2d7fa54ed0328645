//! Dump subsystem: where captured traffic goes.
//!
//! # Data Flow
//! ```text
//! relay chunk → tee.rs (bounded pipe) → background decode task
//!     → Decoder::{request,response}
//!     → DumpSink (per-connection clone when supported)
//!     → SharedDestination (one async mutex per stdout/file)
//! ```
//!
//! # Design Decisions
//! - Dumping is best-effort: sink and decoder failures are logged and
//!   counted, never returned to the relay
//! - A destination serializes whole records so concurrent sessions never
//!   interleave inside one write
//! - Cloned sinks own only their label and sequence counter

pub mod format;
pub mod sink;
pub mod tee;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

pub use sink::{DumpSinks, LabeledSink, RawSink, SharedDestination};
pub use tee::{DecoderTee, TeeDrain};

/// An append-only destination for captured bytes.
///
/// Each `write` is one record; implementations write the whole buffer or
/// fail.
#[async_trait]
pub trait DumpSink: Send + Sync {
    async fn write(&self, buf: &[u8]) -> std::io::Result<usize>;

    /// A sink sharing this one's destination but carrying its own label and
    /// sequence counter. `None` when the sink has no per-connection state.
    fn clone_with_context(&self, _label: &str) -> Option<Arc<dyn DumpSink>> {
        None
    }
}

/// The sink a session should use: a labeled clone when supported, otherwise
/// the shared sink itself.
pub fn specialize(sink: &Arc<dyn DumpSink>, label: &str) -> Arc<dyn DumpSink> {
    sink.clone_with_context(label)
        .unwrap_or_else(|| Arc::clone(sink))
}

/// Records every write in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each write, in order.
    pub fn records(&self) -> Vec<Vec<u8>> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// All writes concatenated.
    pub fn contents(&self) -> Vec<u8> {
        self.records().concat()
    }
}

#[async_trait]
impl DumpSink for MemorySink {
    async fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| std::io::Error::other("memory sink poisoned"))?;
        records.push(buf.to_vec());
        Ok(buf.len())
    }
}
