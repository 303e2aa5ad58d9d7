//! Data root layout and time buckets
//!
//! `layout.json` pins the bucket width for the lifetime of a data root.
//! Partition directories are named after the UTC start of their bucket,
//! `%Y%m%dT%H%M%SZ`, so a lexical listing is also a chronological one.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::durable::write_file_durable;

pub const LAYOUT_FILE_NAME: &str = "layout.json";
pub const LAYOUT_FORMAT_VERSION: u32 = 1;

const BUCKET_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const NANOS_PER_SEC: i64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub format_version: u32,
    pub bucket_width_secs: u64,
}

impl Layout {
    /// Reads `layout.json`, or writes one with `bucket_width_secs` if absent
    pub fn open_or_create(data_dir: &Path, bucket_width_secs: u64) -> io::Result<Self> {
        let path = data_dir.join(LAYOUT_FILE_NAME);
        match fs::read(&path) {
            Ok(bytes) => {
                let layout: Layout = serde_json::from_slice(&bytes).map_err(|e| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("{}: {}", path.display(), e))
                })?;
                if layout.format_version != LAYOUT_FORMAT_VERSION || layout.bucket_width_secs == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("{}: unsupported layout {:?}", path.display(), layout),
                    ));
                }
                Ok(layout)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let layout = Layout {
                    format_version: LAYOUT_FORMAT_VERSION,
                    bucket_width_secs,
                };
                let bytes = serde_json::to_vec_pretty(&layout)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                write_file_durable(&path, &bytes)?;
                Ok(layout)
            }
            Err(e) => Err(e),
        }
    }

    pub fn bucket_width_ns(&self) -> i64 {
        i64::try_from(self.bucket_width_secs)
            .unwrap_or(i64::MAX / NANOS_PER_SEC)
            .saturating_mul(NANOS_PER_SEC)
    }

    /// Start of the bucket containing `ts` (floor, also for pre-epoch times)
    pub fn bucket_start(&self, ts: i64) -> i64 {
        let width = self.bucket_width_ns();
        ts.div_euclid(width).saturating_mul(width)
    }

    /// Inclusive end of the bucket starting at `start`
    pub fn bucket_end(&self, start: i64) -> i64 {
        start.saturating_add(self.bucket_width_ns() - 1)
    }

    /// True if the bucket starting at `start` overlaps `[from, to]`
    pub fn bucket_intersects(&self, start: i64, from: i64, to: i64) -> bool {
        start <= to && self.bucket_end(start) >= from
    }
}

/// Identifies one partition: a source and the start of a time bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub source_id: String,
    pub bucket_start: i64,
}

impl PartitionKey {
    pub fn new(source_id: impl Into<String>, bucket_start: i64) -> Self {
        Self {
            source_id: source_id.into(),
            bucket_start,
        }
    }

    pub fn bucket_name(&self) -> String {
        bucket_dir_name(self.bucket_start)
    }

    pub fn dir(&self, data_root: &Path) -> PathBuf {
        data_root.join(&self.source_id).join(self.bucket_name())
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source_id, self.bucket_name())
    }
}

/// A source id names a directory, so it is restricted to `[A-Za-z0-9_.-]`
/// and may not be `.` or `..`
pub fn is_valid_source_id(source_id: &str) -> bool {
    !source_id.is_empty()
        && source_id != "."
        && source_id != ".."
        && source_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

pub fn bucket_dir_name(bucket_start: i64) -> String {
    DateTime::<Utc>::from_timestamp_nanos(bucket_start)
        .format(BUCKET_FORMAT)
        .to_string()
}

/// Inverse of `bucket_dir_name`; `None` for anything that is not a bucket
pub fn parse_bucket_dir_name(name: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(name, BUCKET_FORMAT)
        .ok()
        .and_then(|naive| naive.and_utc().timestamp_nanos_opt())
}
