//! Immutable columnar segment files
//!
//! ```text
//! +----------------------+
//! | Magic "TKSEG001"     | 8 bytes
//! +----------------------+
//! | Column block 0       | zstd-compressed encoded values
//! | ...                  |
//! | Column block N-1     |
//! +----------------------+
//! | Footer               | JSON: schema, row count, block offsets + CRC32
//! +----------------------+
//! | Footer length        | u32 LE
//! | Footer CRC32         | u32 LE
//! | Magic "TKSEG001"     | 8 bytes
//! +----------------------+
//! ```
//!
//! Encoded values are a tag byte followed by a little-endian payload:
//! 0 null, 1 int64 (8), 2 float64 (8), 3 string (u32 len + bytes),
//! 4 timestamp (8), 5 bool (1).
//!
//! Readers seek straight to the blocks they need, so a projection of two
//! columns reads two blocks plus the footer.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::batch::Value;

use super::checksum::{compute_checksum, verify_checksum};

pub const SEGMENT_MAGIC: &[u8; 8] = b"TKSEG001";

const TRAILER_LEN: u64 = 4 + 4 + 8;

const TAG_NULL: u8 = 0;
const TAG_INT64: u8 = 1;
const TAG_FLOAT64: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_TIMESTAMP: u8 = 4;
const TAG_BOOL: u8 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnBlockMeta {
    pub name: String,
    pub offset: u64,
    pub len: u64,
    pub crc32: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentFooter {
    pub schema_id: String,
    pub schema_version: u32,
    pub row_count: u64,
    pub columns: Vec<ColumnBlockMeta>,
}

/// Min/max over non-null values plus the null count
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    pub null_count: u64,
}

impl ColumnStats {
    pub fn compute(values: &[Value]) -> Self {
        let mut stats = ColumnStats::default();
        for value in values {
            if value.is_null() {
                stats.null_count += 1;
                continue;
            }
            let lower = match stats.min {
                Some(ref min) => value.compare(min) == Some(std::cmp::Ordering::Less),
                None => true,
            };
            if lower {
                stats.min = Some(value.clone());
            }
            let higher = match stats.max {
                Some(ref max) => value.compare(max) == Some(std::cmp::Ordering::Greater),
                None => true,
            };
            if higher {
                stats.max = Some(value.clone());
            }
        }
        stats
    }
}

/// What the writer reports back for the manifest
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSummary {
    pub byte_size: u64,
    pub row_count: u64,
    pub columns: BTreeMap<String, ColumnStats>,
}

/// Writes a segment and fsyncs the file. The caller fsyncs the directory.
pub fn write_segment(
    path: &Path,
    schema_id: &str,
    schema_version: u32,
    names: &[String],
    columns: &[Vec<Value>],
    compression_level: i32,
) -> io::Result<SegmentSummary> {
    if names.len() != columns.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "column names and column values differ in length",
        ));
    }
    let row_count = columns.first().map_or(0, Vec::len) as u64;

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(SEGMENT_MAGIC)?;

    let mut offset = SEGMENT_MAGIC.len() as u64;
    let mut blocks = Vec::with_capacity(names.len());
    let mut stats = BTreeMap::new();

    for (name, values) in names.iter().zip(columns) {
        if values.len() as u64 != row_count {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("column '{}' has {} rows, expected {}", name, values.len(), row_count),
            ));
        }
        let encoded = encode_values(values);
        let compressed = zstd::encode_all(&encoded[..], compression_level)?;
        writer.write_all(&compressed)?;

        blocks.push(ColumnBlockMeta {
            name: name.clone(),
            offset,
            len: compressed.len() as u64,
            crc32: compute_checksum(&compressed),
        });
        stats.insert(name.clone(), ColumnStats::compute(values));
        offset += compressed.len() as u64;
    }

    let footer = SegmentFooter {
        schema_id: schema_id.to_string(),
        schema_version,
        row_count,
        columns: blocks,
    };
    let footer_bytes = serde_json::to_vec(&footer)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&footer_bytes)?;
    writer.write_all(&(footer_bytes.len() as u32).to_le_bytes())?;
    writer.write_all(&compute_checksum(&footer_bytes).to_le_bytes())?;
    writer.write_all(SEGMENT_MAGIC)?;

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok(SegmentSummary {
        byte_size: offset + footer_bytes.len() as u64 + TRAILER_LEN,
        row_count,
        columns: stats,
    })
}

/// Reads column blocks on demand
pub struct SegmentReader<R: Read + Seek = File> {
    inner: R,
    footer: SegmentFooter,
    bytes_read: u64,
}

impl SegmentReader<File> {
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::from_reader(File::open(path)?)
    }
}

impl<R: Read + Seek> SegmentReader<R> {
    pub fn from_reader(mut inner: R) -> io::Result<Self> {
        let file_len = inner.seek(SeekFrom::End(0))?;
        let min_len = SEGMENT_MAGIC.len() as u64 + TRAILER_LEN;
        if file_len < min_len {
            return Err(invalid(format!("segment too short: {} bytes", file_len)));
        }

        let mut head = [0u8; 8];
        inner.seek(SeekFrom::Start(0))?;
        inner.read_exact(&mut head)?;
        if &head != SEGMENT_MAGIC {
            return Err(invalid("bad segment header magic"));
        }

        let mut trailer = [0u8; TRAILER_LEN as usize];
        inner.seek(SeekFrom::Start(file_len - TRAILER_LEN))?;
        inner.read_exact(&mut trailer)?;
        if &trailer[8..16] != SEGMENT_MAGIC {
            return Err(invalid("bad segment trailer magic"));
        }
        let footer_len = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]) as u64;
        let footer_crc = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
        if footer_len > file_len - min_len {
            return Err(invalid(format!("footer length {} exceeds file", footer_len)));
        }

        let mut footer_bytes = vec![0u8; footer_len as usize];
        inner.seek(SeekFrom::Start(file_len - TRAILER_LEN - footer_len))?;
        inner.read_exact(&mut footer_bytes)?;
        if !verify_checksum(&footer_bytes, footer_crc) {
            return Err(invalid("footer checksum mismatch"));
        }
        let footer: SegmentFooter = serde_json::from_slice(&footer_bytes)
            .map_err(|e| invalid(format!("footer is not valid JSON: {}", e)))?;

        Ok(Self {
            inner,
            footer,
            bytes_read: head.len() as u64 + TRAILER_LEN + footer_len,
        })
    }

    pub fn footer(&self) -> &SegmentFooter {
        &self.footer
    }

    pub fn row_count(&self) -> u64 {
        self.footer.row_count
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.footer.columns.iter().map(|c| c.name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.footer.columns.iter().any(|c| c.name == name)
    }

    /// Reads one column, or `None` if the segment does not carry it
    pub fn read_column(&mut self, name: &str) -> io::Result<Option<Vec<Value>>> {
        let meta = match self.footer.columns.iter().find(|c| c.name == name) {
            Some(meta) => meta.clone(),
            None => return Ok(None),
        };

        let mut compressed = vec![0u8; meta.len as usize];
        self.inner.seek(SeekFrom::Start(meta.offset))?;
        self.inner.read_exact(&mut compressed)?;
        self.bytes_read += meta.len;

        if !verify_checksum(&compressed, meta.crc32) {
            return Err(invalid(format!("column '{}' checksum mismatch", name)));
        }
        let encoded = zstd::decode_all(&compressed[..])
            .map_err(|e| invalid(format!("column '{}' does not decompress: {}", name, e)))?;
        decode_values(&encoded, self.footer.row_count as usize).map(Some)
    }

    /// Bytes read from the underlying file so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

fn encode_values(values: &[Value]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(values.len() * 9);
    for value in values {
        match value {
            Value::Null => buf.push(TAG_NULL),
            Value::Int64(v) => {
                buf.push(TAG_INT64);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::Float64(v) => {
                buf.push(TAG_FLOAT64);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::String(s) => {
                buf.push(TAG_STRING);
                buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            Value::Timestamp(ns) => {
                buf.push(TAG_TIMESTAMP);
                buf.extend_from_slice(&ns.to_le_bytes());
            }
            Value::Bool(b) => {
                buf.push(TAG_BOOL);
                buf.push(u8::from(*b));
            }
        }
    }
    buf
}

fn decode_values(data: &[u8], expected_rows: usize) -> io::Result<Vec<Value>> {
    fn take<'a>(data: &'a [u8], pos: &mut usize, n: usize) -> io::Result<&'a [u8]> {
        let end = pos
            .checked_add(n)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| invalid("column block truncated"))?;
        let slice = &data[*pos..end];
        *pos = end;
        Ok(slice)
    }
    fn take8(data: &[u8], pos: &mut usize) -> io::Result<[u8; 8]> {
        let mut out = [0u8; 8];
        out.copy_from_slice(take(data, pos, 8)?);
        Ok(out)
    }

    let mut values = Vec::with_capacity(expected_rows);
    let mut pos = 0;
    while pos < data.len() {
        let tag = take(data, &mut pos, 1)?[0];
        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_INT64 => Value::Int64(i64::from_le_bytes(take8(data, &mut pos)?)),
            TAG_FLOAT64 => Value::Float64(f64::from_le_bytes(take8(data, &mut pos)?)),
            TAG_STRING => {
                let mut len = [0u8; 4];
                len.copy_from_slice(take(data, &mut pos, 4)?);
                let bytes = take(data, &mut pos, u32::from_le_bytes(len) as usize)?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|e| invalid(format!("invalid UTF-8 in string value: {}", e)))?;
                Value::String(s.to_string())
            }
            TAG_TIMESTAMP => Value::Timestamp(i64::from_le_bytes(take8(data, &mut pos)?)),
            TAG_BOOL => Value::Bool(take(data, &mut pos, 1)?[0] != 0),
            other => return Err(invalid(format!("unknown value tag {}", other))),
        };
        values.push(value);
    }

    if values.len() != expected_rows {
        return Err(invalid(format!(
            "column block holds {} values, footer says {}",
            values.len(),
            expected_rows
        )));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sample() -> (Vec<String>, Vec<Vec<Value>>) {
        let names = vec!["ts".to_string(), "symbol".to_string(), "price".to_string()];
        let columns = vec![
            vec![Value::Timestamp(10), Value::Timestamp(20), Value::Timestamp(30)],
            vec![
                Value::String("AAPL".into()),
                Value::String("MSFT".into()),
                Value::Null,
            ],
            vec![Value::Float64(1.5), Value::Float64(-2.0), Value::Float64(9.25)],
        ];
        (names, columns)
    }

    #[test]
    fn test_write_then_read_projected_column() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("part-1.seg");
        let (names, columns) = sample();

        let summary = write_segment(&path, "ticks", 1, &names, &columns, 3).unwrap();
        assert_eq!(summary.row_count, 3);
        assert_eq!(summary.byte_size, fs::metadata(&path).unwrap().len());

        let mut reader = SegmentReader::open(&path).unwrap();
        assert_eq!(reader.footer().schema_id, "ticks");
        let before = reader.bytes_read();
        let prices = reader.read_column("price").unwrap().unwrap();
        assert_eq!(prices, columns[2]);

        // Only the price block was read beyond the footer
        let price_block = reader.footer().columns[2].len;
        assert_eq!(reader.bytes_read(), before + price_block);
        assert!(reader.read_column("exchange").unwrap().is_none());
    }

    #[test]
    fn test_stats_ignore_nulls() {
        let temp_dir = TempDir::new().unwrap();
        let (names, columns) = sample();
        let summary =
            write_segment(&temp_dir.path().join("p.seg"), "ticks", 1, &names, &columns, 1).unwrap();

        let symbol = &summary.columns["symbol"];
        assert_eq!(symbol.null_count, 1);
        assert_eq!(symbol.min, Some(Value::String("AAPL".into())));
        assert_eq!(symbol.max, Some(Value::String("MSFT".into())));

        let price = &summary.columns["price"];
        assert_eq!(price.min, Some(Value::Float64(-2.0)));
        assert_eq!(price.max, Some(Value::Float64(9.25)));
    }

    #[test]
    fn test_corrupt_block_detected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("p.seg");
        let (names, columns) = sample();
        write_segment(&path, "ticks", 1, &names, &columns, 1).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes[9] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let mut reader = SegmentReader::open(&path).unwrap();
        let err = reader.read_column("ts").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_file_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("p.seg");
        let (names, columns) = sample();
        write_segment(&path, "ticks", 1, &names, &columns, 1).unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

        let err = SegmentReader::open(&path).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
