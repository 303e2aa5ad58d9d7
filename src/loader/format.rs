//! Input format detection
//!
//! Detection peeks at the buffered head of the source and never consumes it,
//! so the decoder sees the input from its first byte. Gzip is recognized by
//! its magic and unwrapped before the inner format is detected.

use std::fmt;
use std::io::BufRead;

use serde::{Deserialize, Serialize};

use crate::store::segment::SEGMENT_MAGIC;

use super::errors::{LoaderError, LoaderResult};

/// Leading bytes of a gzip member
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Delimiters tried when sniffing, in tie-break order
pub const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b'\t', b'|', b';'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputFormat {
    /// Header line plus one record per line
    Delimited { delimiter: u8 },
    /// One JSON object per line
    Ndjson,
    /// A segment file produced by this store
    PreColumnar,
}

impl InputFormat {
    pub fn name(&self) -> &'static str {
        match self {
            InputFormat::Delimited { .. } => "delimited",
            InputFormat::Ndjson => "ndjson",
            InputFormat::PreColumnar => "pre_columnar",
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputFormat::Delimited { delimiter } => {
                write!(f, "delimited({:?})", char::from(*delimiter))
            }
            other => f.write_str(other.name()),
        }
    }
}

/// Whether the source starts with a gzip header; consumes nothing
pub fn is_gzip<R: BufRead + ?Sized>(source: &mut R) -> LoaderResult<bool> {
    let head = source.fill_buf().map_err(LoaderError::source_io)?;
    Ok(head.starts_with(&GZIP_MAGIC))
}

/// Classifies the source from its leading bytes without consuming them
///
/// Expects uncompressed input; see `is_gzip`.
pub fn detect_format<R: BufRead + ?Sized>(source: &mut R) -> LoaderResult<InputFormat> {
    let head = source.fill_buf().map_err(LoaderError::source_io)?;
    if head.is_empty() {
        return Err(LoaderError::unsupported_format("input is empty"));
    }
    if head.starts_with(SEGMENT_MAGIC) {
        return Ok(InputFormat::PreColumnar);
    }

    let start = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .ok_or_else(|| LoaderError::unsupported_format("input is blank"))?;
    let rest = &head[start..];
    if rest[0] == b'{' {
        return Ok(InputFormat::Ndjson);
    }

    let line_end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
    let line = first_line_text(&rest[..line_end], line_end == rest.len())
        .ok_or_else(|| LoaderError::unsupported_format("leading bytes are not text"))?;

    Ok(InputFormat::Delimited {
        delimiter: sniff_delimiter(line),
    })
}

/// The first line as text, if it is printable UTF-8
///
/// When the line runs to the end of the peeked buffer, a multi-byte
/// character cut in half at the edge is tolerated.
fn first_line_text(bytes: &[u8], truncated: bool) -> Option<&str> {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) if truncated && e.error_len().is_none() => {
            std::str::from_utf8(&bytes[..e.valid_up_to()]).ok()?
        }
        Err(_) => return None,
    };
    let printable = text
        .chars()
        .all(|c| !c.is_control() || c == '\t' || c == '\r');
    printable.then_some(text)
}

/// Most frequent candidate delimiter in the line; `,` when none occurs
pub fn sniff_delimiter(line: &str) -> u8 {
    let mut best = (b',', 0usize);
    for candidate in CANDIDATE_DELIMITERS {
        let count = line.bytes().filter(|&b| b == candidate).count();
        if count > best.1 {
            best = (candidate, count);
        }
    }
    best.0
}
