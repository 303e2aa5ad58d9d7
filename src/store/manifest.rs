//! Per-partition manifest log
//!
//! `_manifest.log` holds one committed data file per line:
//!
//! ```text
//! <crc32 as 8 hex digits> <entry JSON>\n
//! ```
//!
//! Appending a line and fsyncing it is the commit point of a flush. A final
//! line without its newline is a torn append and is ignored; any other line
//! that fails its checksum is corruption.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::durable::fsync_dir;

use super::checksum::{compute_checksum, verify_checksum};
use super::segment::ColumnStats;

pub const MANIFEST_FILE_NAME: &str = "_manifest.log";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file_name: String,
    pub schema_id: String,
    pub schema_version: u32,
    pub time_field: String,
    pub row_count: u64,
    pub byte_size: u64,
    pub min_ts: i64,
    pub max_ts: i64,
    pub columns: BTreeMap<String, ColumnStats>,
    pub committed_at: DateTime<Utc>,
}

/// Appends one entry and fsyncs the manifest
///
/// Must be called with the partition lock held. A torn tail left by an
/// earlier crash is cut off first so the new line starts on a clean boundary.
/// Retrying after a failed fsync is safe: if the last committed line is
/// already this entry, it is synced again rather than written twice.
pub fn append_entry(partition_dir: &Path, entry: &ManifestEntry) -> io::Result<()> {
    let path = partition_dir.join(MANIFEST_FILE_NAME);
    let created = !path.exists();

    let json = serde_json::to_string(entry)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let line = format!("{:08x} {}\n", compute_checksum(json.as_bytes()), json);

    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(&path)?;
    let mut content = Vec::new();
    file.read_to_end(&mut content)?;

    let committed = committed_length(&content);
    if committed < content.len() {
        file.set_len(committed as u64)?;
        file.sync_all()?;
    }

    let written = content[..committed].ends_with(line.as_bytes())
        && (committed == line.len() || content[committed - line.len() - 1] == b'\n');
    if !written {
        file.write_all(line.as_bytes())?;
    }
    file.sync_all()?;

    if created || written {
        fsync_dir(partition_dir)?;
    }
    Ok(())
}

/// Length of the prefix that ends with the last complete line
fn committed_length(content: &[u8]) -> usize {
    content
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |pos| pos + 1)
}

/// Whether a committed entry references `file_name`
pub fn has_entry(partition_dir: &Path, file_name: &str) -> io::Result<bool> {
    Ok(read_manifest(partition_dir)?
        .iter()
        .any(|entry| entry.file_name == file_name))
}

/// Reads every committed entry. A missing manifest means an empty partition.
pub fn read_manifest(partition_dir: &Path) -> io::Result<Vec<ManifestEntry>> {
    let path = partition_dir.join(MANIFEST_FILE_NAME);
    let content = match fs::read(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut entries = Vec::new();
    let mut rest: &[u8] = &content;
    let mut line_no = 0usize;

    while !rest.is_empty() {
        line_no += 1;
        let Some(newline) = rest.iter().position(|b| *b == b'\n') else {
            // Torn final append
            break;
        };
        let line = &rest[..newline];
        rest = &rest[newline + 1..];
        entries.push(parse_line(line).map_err(|reason| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} line {}: {}", path.display(), line_no, reason),
            )
        })?);
    }

    Ok(entries)
}

fn parse_line(line: &[u8]) -> Result<ManifestEntry, String> {
    let text = std::str::from_utf8(line).map_err(|_| "invalid UTF-8".to_string())?;
    let (crc_hex, json) = text
        .split_once(' ')
        .ok_or_else(|| "missing checksum separator".to_string())?;
    let crc = u32::from_str_radix(crc_hex, 16).map_err(|_| format!("bad checksum '{}'", crc_hex))?;
    if !verify_checksum(json.as_bytes(), crc) {
        return Err("checksum mismatch".into());
    }
    serde_json::from_str(json).map_err(|e| format!("invalid entry JSON: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Value;
    use tempfile::TempDir;

    fn entry(file_name: &str, min_ts: i64, max_ts: i64) -> ManifestEntry {
        let mut columns = BTreeMap::new();
        columns.insert(
            "ts".to_string(),
            ColumnStats {
                min: Some(Value::Timestamp(min_ts)),
                max: Some(Value::Timestamp(max_ts)),
                null_count: 0,
            },
        );
        ManifestEntry {
            file_name: file_name.to_string(),
            schema_id: "ticks".into(),
            schema_version: 1,
            time_field: "ts".into(),
            row_count: 2,
            byte_size: 128,
            min_ts,
            max_ts,
            columns,
            committed_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_missing_manifest_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        assert!(read_manifest(temp_dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_append_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        append_entry(temp_dir.path(), &entry("part-a.seg", 1, 5)).unwrap();
        append_entry(temp_dir.path(), &entry("part-b.seg", 6, 9)).unwrap();

        let entries = read_manifest(temp_dir.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], entry("part-a.seg", 1, 5));
        assert_eq!(entries[1].file_name, "part-b.seg");
    }

    #[test]
    fn test_torn_tail_ignored_then_repaired() {
        let temp_dir = TempDir::new().unwrap();
        append_entry(temp_dir.path(), &entry("part-a.seg", 1, 5)).unwrap();

        let path = temp_dir.path().join(MANIFEST_FILE_NAME);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"0badc0de {\"file_name\":\"part-torn").unwrap();
        drop(file);

        assert_eq!(read_manifest(temp_dir.path()).unwrap().len(), 1);

        append_entry(temp_dir.path(), &entry("part-b.seg", 6, 9)).unwrap();
        let names: Vec<_> = read_manifest(temp_dir.path())
            .unwrap()
            .into_iter()
            .map(|e| e.file_name)
            .collect();
        assert_eq!(names, vec!["part-a.seg", "part-b.seg"]);
    }

    #[test]
    fn test_retried_append_writes_one_line() {
        let temp_dir = TempDir::new().unwrap();
        append_entry(temp_dir.path(), &entry("part-a.seg", 1, 5)).unwrap();
        // A retry after a failed fsync finds its own line already in place
        append_entry(temp_dir.path(), &entry("part-b.seg", 6, 9)).unwrap();
        append_entry(temp_dir.path(), &entry("part-b.seg", 6, 9)).unwrap();

        let names: Vec<_> = read_manifest(temp_dir.path())
            .unwrap()
            .into_iter()
            .map(|e| e.file_name)
            .collect();
        assert_eq!(names, vec!["part-a.seg", "part-b.seg"]);
        assert!(has_entry(temp_dir.path(), "part-b.seg").unwrap());
        assert!(!has_entry(temp_dir.path(), "part-c.seg").unwrap());

        let content = fs::read_to_string(temp_dir.path().join(MANIFEST_FILE_NAME)).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_corrupt_committed_line_is_error() {
        let temp_dir = TempDir::new().unwrap();
        append_entry(temp_dir.path(), &entry("part-a.seg", 1, 5)).unwrap();
        append_entry(temp_dir.path(), &entry("part-b.seg", 6, 9)).unwrap();

        let path = temp_dir.path().join(MANIFEST_FILE_NAME);
        let content = fs::read_to_string(&path).unwrap().replacen("part-a", "part-x", 1);
        fs::write(&path, content).unwrap();

        let err = read_manifest(temp_dir.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("line 1"));
    }
}
