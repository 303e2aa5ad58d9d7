//! Replay markers
//!
//! `<reason>.replayed` sits beside each log and lists the records whose rows
//! a replay has committed to the store, by their offset in the log:
//!
//! ```text
//! +------------------+
//! | Record Offset    | (u64 LE)
//! | Checksum         | (u32 LE, over the offset bytes)
//! +------------------+
//! ```
//!
//! A short final entry is a torn append and is ignored.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::durable::fsync_dir;
use crate::store::checksum::{compute_checksum, verify_checksum};

pub const MARKER_EXTENSION: &str = "replayed";

const ENTRY_SIZE: usize = 12;

pub fn marker_path(log: &Path) -> PathBuf {
    log.with_extension(MARKER_EXTENSION)
}

/// Offsets already replayed from `log`; none if it has no marker file
pub fn read_markers(log: &Path) -> io::Result<BTreeSet<u64>> {
    let path = marker_path(log);
    let content = match fs::read(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => return Err(e),
    };

    let mut offsets = BTreeSet::new();
    for (index, chunk) in content.chunks_exact(ENTRY_SIZE).enumerate() {
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&chunk[..8]);
        let mut crc = [0u8; 4];
        crc.copy_from_slice(&chunk[8..]);
        if !verify_checksum(&offset, u32::from_le_bytes(crc)) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} entry {}: checksum mismatch", path.display(), index),
            ));
        }
        offsets.insert(u64::from_le_bytes(offset));
    }
    Ok(offsets)
}

/// Appends `offsets` to the marker of `log` and fsyncs it
pub fn append_markers(log: &Path, offsets: &[u64]) -> io::Result<()> {
    if offsets.is_empty() {
        return Ok(());
    }
    let path = marker_path(log);
    let created = !path.exists();

    let mut bytes = Vec::with_capacity(offsets.len() * ENTRY_SIZE);
    for offset in offsets {
        let raw = offset.to_le_bytes();
        bytes.extend_from_slice(&raw);
        bytes.extend_from_slice(&compute_checksum(&raw).to_le_bytes());
    }

    let mut file = OpenOptions::new().append(true).create(true).open(&path)?;
    let len = file.metadata()?.len();
    let torn = len % ENTRY_SIZE as u64;
    if torn != 0 {
        file.set_len(len - torn)?;
    }
    file.write_all(&bytes)?;
    file.sync_all()?;

    if created {
        if let Some(dir) = path.parent() {
            fsync_dir(dir)?;
        }
    }
    Ok(())
}
