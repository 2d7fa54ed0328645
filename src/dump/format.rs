//! Rendering of labeled dump records.
//!
//! Colored records mark the sequence number red and, in hex rows, the row
//! number yellow, the byte range green and the escaped bytes cyan.

use std::fmt::Write as _;

use colored::{Color, Colorize};

/// Bytes per row in hex records.
const HEX_ROW: usize = 40;

/// How a labeled record renders its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStyle {
    Text,
    Hex,
}

fn paint(text: String, color: Color, enabled: bool) -> String {
    if enabled {
        text.color(color).to_string()
    } else {
        text
    }
}

/// Header line: `[kind][seq][label][Len=n] timestamp`.
pub fn header(kind: &str, seq: u64, label: &str, len: usize, color: bool) -> String {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f");
    let seq = paint(seq.to_string(), Color::Red, color);
    format!("[{kind}][{seq}][{label}][Len={len}] {now}\n")
}

/// One complete record, ready for a single destination write.
pub fn render(
    style: RecordStyle,
    color: bool,
    kind: &str,
    seq: u64,
    label: &str,
    payload: &[u8],
) -> Vec<u8> {
    let mut record = header(kind, seq, label, payload.len(), color).into_bytes();
    match style {
        RecordStyle::Text => {
            record.extend_from_slice(payload);
            record.extend_from_slice(b"\n\n");
        }
        RecordStyle::Hex => {
            record.extend_from_slice(hex_rows(payload, color).as_bytes());
            record.push(b'\n');
        }
    }
    record
}

/// Rows of `NNN\t[start - end] "escaped"` followed by the row's hex bytes.
pub fn hex_rows(payload: &[u8], color: bool) -> String {
    let mut out = String::new();
    for (line, row) in payload.chunks(HEX_ROW).enumerate() {
        let start = line * HEX_ROW;
        let number = paint(format!("{line:03}"), Color::Yellow, color);
        let range = paint(
            format!("[{start:4} - {end:4}]", end = start + row.len()),
            Color::BrightGreen,
            color,
        );
        let escaped = paint(format!("\"{}\"", row.escape_ascii()), Color::Cyan, color);
        let _ = writeln!(out, "{number}\t{range} {escaped}\n\t{}", hex::encode(row));
    }
    out
}
