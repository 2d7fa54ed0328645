//! Concrete sinks and their construction from configuration.

use std::collections::HashMap;
use std::io::IsTerminal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::format::{self, RecordStyle};
use super::DumpSink;
use crate::config::{DumpConfig, DumpFormat};
use crate::decoder::Direction;
use crate::error::ConfigError;

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An output (stdout, a file) shared by every sink that writes to it.
///
/// Whole records are written under one lock, so records from concurrent
/// sessions never interleave.
#[derive(Clone)]
pub struct SharedDestination {
    name: Arc<str>,
    writer: Arc<Mutex<BoxWriter>>,
}

impl SharedDestination {
    pub fn new(name: impl Into<Arc<str>>, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            name: name.into(),
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new("stdout", tokio::io::stdout())
    }

    /// Open `path` for appending, creating it if missing.
    pub async fn append_file(path: &str) -> std::io::Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self::new(path, file))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write one whole record.
    pub async fn write_record(&self, record: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(record).await?;
        writer.flush().await
    }
}

impl std::fmt::Debug for SharedDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDestination")
            .field("name", &self.name)
            .finish()
    }
}

/// Writes payloads unchanged.
#[derive(Debug, Clone)]
pub struct RawSink {
    dest: SharedDestination,
}

impl RawSink {
    pub fn new(dest: SharedDestination) -> Self {
        Self { dest }
    }
}

#[async_trait]
impl DumpSink for RawSink {
    async fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        self.dest.write_record(buf).await?;
        Ok(buf.len())
    }
}

/// Writes each payload under a `[kind][seq][label]` header.
///
/// Clones share the destination and coloring and restart the sequence.
#[derive(Debug)]
pub struct LabeledSink {
    kind: &'static str,
    label: String,
    style: RecordStyle,
    color: bool,
    seq: AtomicU64,
    dest: SharedDestination,
}

impl LabeledSink {
    pub fn new(kind: &'static str, style: RecordStyle, dest: SharedDestination) -> Self {
        Self {
            kind,
            label: "-".to_string(),
            style,
            color: false,
            seq: AtomicU64::new(0),
            dest,
        }
    }

    /// Color headers and hex rows with ANSI escapes.
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[async_trait]
impl DumpSink for LabeledSink {
    async fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let record = format::render(self.style, self.color, self.kind, seq, &self.label, buf);
        self.dest.write_record(&record).await?;
        Ok(buf.len())
    }

    fn clone_with_context(&self, label: &str) -> Option<Arc<dyn DumpSink>> {
        Some(Arc::new(Self {
            kind: self.kind,
            label: label.to_string(),
            style: self.style,
            color: self.color,
            seq: AtomicU64::new(0),
            dest: self.dest.clone(),
        }))
    }
}

/// The process-wide sinks for each direction. `None` disables that direction.
#[derive(Clone, Default)]
pub struct DumpSinks {
    pub request: Option<Arc<dyn DumpSink>>,
    pub response: Option<Arc<dyn DumpSink>>,
}

impl DumpSinks {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn get(&self, direction: Direction) -> Option<&Arc<dyn DumpSink>> {
        match direction {
            Direction::Request => self.request.as_ref(),
            Direction::Response => self.response.as_ref(),
        }
    }

    /// Open the configured destinations.
    ///
    /// `stdout` and identical file paths are opened once and shared between
    /// directions.
    pub async fn open(config: &DumpConfig) -> Result<Self, ConfigError> {
        let mut opened: HashMap<String, SharedDestination> = HashMap::new();
        let mut sinks = Self::none();

        for direction in [Direction::Request, Direction::Response] {
            let target = match direction {
                Direction::Request => config.request.as_str(),
                Direction::Response => config.response.as_str(),
            };
            if target.is_empty() || target == "-" {
                continue;
            }

            let dest = match opened.get(target) {
                Some(dest) => dest.clone(),
                None => {
                    let dest = if target == "stdout" {
                        SharedDestination::stdout()
                    } else {
                        SharedDestination::append_file(target)
                            .await
                            .map_err(|source| ConfigError::DumpOpen {
                                path: target.to_string(),
                                source,
                            })?
                    };
                    opened.insert(target.to_string(), dest.clone());
                    dest
                }
            };

            tracing::info!(direction = %direction, destination = %dest.name(), "Dump destination opened");
            let sink = build_sink(direction, config.format, target == "stdout", dest);
            match direction {
                Direction::Request => sinks.request = Some(sink),
                Direction::Response => sinks.response = Some(sink),
            }
        }

        Ok(sinks)
    }
}

fn build_sink(
    direction: Direction,
    format: DumpFormat,
    is_stdout: bool,
    dest: SharedDestination,
) -> Arc<dyn DumpSink> {
    let style = match format {
        DumpFormat::Auto if is_stdout => Some(RecordStyle::Text),
        DumpFormat::Auto | DumpFormat::Raw => None,
        DumpFormat::Text => Some(RecordStyle::Text),
        DumpFormat::Hex => Some(RecordStyle::Hex),
    };
    match style {
        Some(style) => Arc::new(
            LabeledSink::new(direction.as_str(), style, dest)
                .with_color(is_stdout && std::io::stdout().is_terminal()),
        ),
        None => Arc::new(RawSink::new(dest)),
    }
}

impl std::fmt::Debug for DumpSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumpSinks")
            .field("request", &self.request.is_some())
            .field("response", &self.response.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn config(request: &str, response: &str, format: DumpFormat) -> DumpConfig {
        DumpConfig {
            request: request.to_string(),
            response: response.to_string(),
            format,
            ..DumpConfig::default()
        }
    }

    #[tokio::test]
    async fn clones_keep_independent_sequences_on_one_destination() {
        let (writer, mut reader) = tokio::io::duplex(64 * 1024);
        let root = LabeledSink::new("req", RecordStyle::Text, SharedDestination::new("mem", writer));

        let a = root.clone_with_context("conn-1").unwrap();
        let b = root.clone_with_context("conn-2").unwrap();
        a.write(b"one").await.unwrap();
        b.write(b"two").await.unwrap();
        a.write(b"three").await.unwrap();
        drop((root, a, b));

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        let headers: Vec<&str> = out.lines().filter(|l| l.starts_with('[')).collect();

        assert_eq!(headers.len(), 3);
        assert!(headers[0].starts_with("[req][1][conn-1][Len=3]"));
        assert!(headers[1].starts_with("[req][1][conn-2][Len=3]"));
        assert!(headers[2].starts_with("[req][2][conn-1][Len=5]"));
    }

    #[tokio::test]
    async fn clones_inherit_coloring() {
        colored::control::set_override(true);
        let (writer, mut reader) = tokio::io::duplex(64 * 1024);
        let root = LabeledSink::new("resp", RecordStyle::Text, SharedDestination::new("mem", writer))
            .with_color(true);

        let conn = root.clone_with_context("conn-3").unwrap();
        conn.write(b"body").await.unwrap();
        drop((root, conn));

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("[resp][\u{1b}["));
        assert!(out.contains("[conn-3][Len=4]"));
        assert!(out.contains("\nbody\n\n"));
    }

    #[tokio::test]
    async fn disabled_targets_produce_no_sink() {
        let sinks = DumpSinks::open(&config("", "-", DumpFormat::Auto)).await.unwrap();
        assert!(sinks.get(Direction::Request).is_none());
        assert!(sinks.get(Direction::Response).is_none());
    }

    #[tokio::test]
    async fn same_path_shares_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.log");
        let path = path.to_str().unwrap();

        let sinks = DumpSinks::open(&config(path, path, DumpFormat::Auto)).await.unwrap();
        sinks.request.as_ref().unwrap().write(b"ping").await.unwrap();
        sinks.response.as_ref().unwrap().write(b"pong").await.unwrap();

        assert_eq!(std::fs::read(path).unwrap(), b"pingpong".to_vec());
    }

    #[tokio::test]
    async fn file_appends_and_respects_explicit_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("req.log");
        std::fs::write(&path, "existing\n").unwrap();
        let path = path.to_str().unwrap();

        let sinks = DumpSinks::open(&config(path, "", DumpFormat::Text)).await.unwrap();
        sinks.request.as_ref().unwrap().write(b"GET /").await.unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.starts_with("existing\n[req][1][-][Len=5] "));
        assert!(content.ends_with("\nGET /\n\n"));
    }

    #[tokio::test]
    async fn unopenable_path_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("dump.log");
        let result = DumpSinks::open(&config(path.to_str().unwrap(), "", DumpFormat::Raw)).await;
        assert!(matches!(result, Err(ConfigError::DumpOpen { .. })));
    }
}
