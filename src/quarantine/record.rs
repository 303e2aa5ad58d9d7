//! Quarantine record format
//!
//! ```text
//! +------------------+
//! | Record Length    | (u32 LE, whole record including this field)
//! +------------------+
//! | Source ID        | (length-prefixed string)
//! | Schema ID        | (length-prefixed string)
//! | Schema Version   | (u32 LE)
//! | Ingest Timestamp | (i64 LE, nanoseconds)
//! | Reason Code      | (u8: 0 = DecodeError, 1 = ValidationError)
//! | Input Format     | (u8 kind, u8 delimiter)
//! | Column Names     | (u32 count, then length-prefixed strings)
//! | Detail           | (length-prefixed string)
//! | Raw Payload      | (length-prefixed bytes)
//! +------------------+
//! | Checksum         | (u32 LE)
//! +------------------+
//! ```
//!
//! Checksum covers all bytes except the checksum itself.

use std::io::{self, Cursor, Read};

use serde::{Deserialize, Serialize};

use crate::loader::InputFormat;
use crate::store::checksum::compute_checksum;
use crate::validator::ReasonCode;

/// Smallest possible record: length, fixed fields, empty variable fields, checksum
pub const MIN_RECORD_SIZE: usize = 4 + 4 + 4 + 4 + 8 + 1 + 2 + 4 + 4 + 4 + 4;

/// Upper bound used to tell a damaged length field from a large record
pub const MAX_RECORD_SIZE: usize = 256 * 1024 * 1024;

/// One rejected row, with everything needed to replay it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub source_id: String,
    pub schema_id: String,
    pub schema_version: u32,
    pub ingest_ts: i64,
    pub reason: ReasonCode,
    pub detail: String,
    pub input_format: InputFormat,
    /// Header of the delimited input the row came from; empty otherwise
    pub column_names: Vec<String>,
    /// The row exactly as read
    pub raw_payload: Vec<u8>,
}

impl QuarantineRecord {
    fn serialize_body(&self, buf: &mut Vec<u8>) {
        put_bytes(buf, self.source_id.as_bytes());
        put_bytes(buf, self.schema_id.as_bytes());
        buf.extend_from_slice(&self.schema_version.to_le_bytes());
        buf.extend_from_slice(&self.ingest_ts.to_le_bytes());
        buf.push(match self.reason {
            ReasonCode::DecodeError => 0,
            ReasonCode::ValidationError => 1,
        });
        let (kind, delimiter) = match self.input_format {
            InputFormat::Delimited { delimiter } => (0, delimiter),
            InputFormat::Ndjson => (1, 0),
            InputFormat::PreColumnar => (2, 0),
        };
        buf.push(kind);
        buf.push(delimiter);
        buf.extend_from_slice(&(self.column_names.len() as u32).to_le_bytes());
        for name in &self.column_names {
            put_bytes(buf, name.as_bytes());
        }
        put_bytes(buf, self.detail.as_bytes());
        put_bytes(buf, &self.raw_payload);
    }

    /// Serialize the complete record, length prefix and checksum included
    pub fn serialize(&self) -> Vec<u8> {
        let mut record = vec![0u8; 4];
        self.serialize_body(&mut record);

        let record_length = (record.len() + 4) as u32;
        record[..4].copy_from_slice(&record_length.to_le_bytes());
        let checksum = compute_checksum(&record);
        record.extend_from_slice(&checksum.to_le_bytes());
        record
    }

    /// Deserialize one record from the front of `data`, verifying its checksum
    ///
    /// Returns the record and the number of bytes consumed. Too few bytes is
    /// `UnexpectedEof`; a bad length or checksum is `InvalidData`.
    pub fn deserialize(data: &[u8]) -> io::Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "Record too short"));
        }
        let record_length = record_length(&data[..4])?;
        if data.len() < record_length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Record truncated: expected {} bytes, got {}",
                    record_length,
                    data.len()
                ),
            ));
        }

        let checksum_offset = record_length - 4;
        let stored = u32::from_le_bytes([
            data[checksum_offset],
            data[checksum_offset + 1],
            data[checksum_offset + 2],
            data[checksum_offset + 3],
        ]);
        let computed = compute_checksum(&data[..checksum_offset]);
        if computed != stored {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Checksum mismatch: computed {:08x}, stored {:08x}",
                    computed, stored
                ),
            ));
        }

        let mut cursor = Cursor::new(&data[4..checksum_offset]);
        let source_id = read_string(&mut cursor)?;
        let schema_id = read_string(&mut cursor)?;
        let schema_version = u32::from_le_bytes(read_array(&mut cursor)?);
        let ingest_ts = i64::from_le_bytes(read_array(&mut cursor)?);
        let reason = match read_array::<1>(&mut cursor)?[0] {
            0 => ReasonCode::DecodeError,
            1 => ReasonCode::ValidationError,
            other => return Err(invalid(format!("Unknown reason code {}", other))),
        };
        let [kind, delimiter] = read_array::<2>(&mut cursor)?;
        let input_format = match kind {
            0 => InputFormat::Delimited { delimiter },
            1 => InputFormat::Ndjson,
            2 => InputFormat::PreColumnar,
            other => return Err(invalid(format!("Unknown input format {}", other))),
        };
        let column_count = u32::from_le_bytes(read_array(&mut cursor)?) as usize;
        let mut column_names = Vec::with_capacity(column_count.min(1024));
        for _ in 0..column_count {
            column_names.push(read_string(&mut cursor)?);
        }
        let detail = read_string(&mut cursor)?;
        let raw_payload = read_bytes(&mut cursor)?;

        Ok((
            Self {
                source_id,
                schema_id,
                schema_version,
                ingest_ts,
                reason,
                detail,
                input_format,
                column_names,
                raw_payload,
            },
            record_length,
        ))
    }
}

/// Decodes and bounds-checks a length prefix
pub fn record_length(prefix: &[u8]) -> io::Result<usize> {
    let length = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if !(MIN_RECORD_SIZE..=MAX_RECORD_SIZE).contains(&length) {
        return Err(invalid(format!("Invalid record length: {}", length)));
    }
    Ok(length)
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

// A short body inside a checksummed record is damage, not a torn write
fn read_array<const N: usize>(reader: &mut Cursor<&[u8]>) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader
        .read_exact(&mut buf)
        .map_err(|_| invalid("Record body ends early".to_string()))?;
    Ok(buf)
}

fn read_bytes(reader: &mut Cursor<&[u8]>) -> io::Result<Vec<u8>> {
    let len = u32::from_le_bytes(read_array(reader)?) as usize;
    let remaining = reader.get_ref().len() - reader.position() as usize;
    if len > remaining {
        return Err(invalid(format!("Field length {} exceeds record", len)));
    }
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|_| invalid("Record body ends early".to_string()))?;
    Ok(buf)
}

fn read_string(reader: &mut Cursor<&[u8]>) -> io::Result<String> {
    String::from_utf8(read_bytes(reader)?)
        .map_err(|e| invalid(format!("Invalid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> QuarantineRecord {
        QuarantineRecord {
            source_id: "feed".into(),
            schema_id: "ticks_v1".into(),
            schema_version: 1,
            ingest_ts: 1_704_067_200_000_000_000,
            reason: ReasonCode::ValidationError,
            detail: "field 'price': cannot coerce".into(),
            input_format: InputFormat::Delimited { delimiter: b'|' },
            column_names: vec!["ts".into(), "symbol".into(), "price".into()],
            raw_payload: b"1|AAPL|abc".to_vec(),
        }
    }

    #[test]
    fn test_record_roundtrip() {
        let record = sample();
        let bytes = record.serialize();
        let (back, consumed) = QuarantineRecord::deserialize(&bytes).unwrap();
        assert_eq!(back, record);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut bytes = sample().serialize();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        let err = QuarantineRecord::deserialize(&bytes).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("Checksum mismatch"));
    }

    #[test]
    fn test_truncated_record_is_eof() {
        let bytes = sample().serialize();
        let err = QuarantineRecord::deserialize(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_minimum_size_matches_empty_record() {
        let record = QuarantineRecord {
            source_id: String::new(),
            schema_id: String::new(),
            schema_version: 0,
            ingest_ts: 0,
            reason: ReasonCode::DecodeError,
            detail: String::new(),
            input_format: InputFormat::Ndjson,
            column_names: Vec::new(),
            raw_payload: Vec::new(),
        };
        assert_eq!(record.serialize().len(), MIN_RECORD_SIZE);
    }
}
