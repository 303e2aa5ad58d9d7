//! Sequential reading of one quarantine log
//!
//! A crash during an append can leave a partial record at the end of the
//! log. That torn tail was never acknowledged, so readers stop there
//! silently. A complete record with a bad checksum is corruption.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use super::record::{record_length, QuarantineRecord};

pub struct LogReader {
    reader: BufReader<File>,
    offset: u64,
    done: bool,
}

impl LogReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
            offset: 0,
            done: false,
        })
    }

    /// Offset just past the last complete record read so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Next complete record, or `None` at end of log or at a torn tail
    pub fn next_record(&mut self) -> io::Result<Option<QuarantineRecord>> {
        if self.done {
            return Ok(None);
        }

        let mut prefix = [0u8; 4];
        let got = read_full(&mut self.reader, &mut prefix)?;
        if got < prefix.len() {
            self.done = true;
            return Ok(None);
        }

        let length = match record_length(&prefix) {
            Ok(length) => length,
            Err(e) => {
                // A length that points past the end is a torn write, not damage
                if self.at_end()? {
                    self.done = true;
                    return Ok(None);
                }
                return Err(e);
            }
        };

        let mut record = vec![0u8; length];
        record[..4].copy_from_slice(&prefix);
        let got = read_full(&mut self.reader, &mut record[4..])?;
        if got < length - 4 {
            self.done = true;
            return Ok(None);
        }

        let (parsed, consumed) = QuarantineRecord::deserialize(&record)?;
        self.offset += consumed as u64;
        Ok(Some(parsed))
    }

    fn at_end(&mut self) -> io::Result<bool> {
        let mut next = [0u8; 1];
        Ok(read_full(&mut self.reader, &mut next)? == 0)
    }
}

/// Offset of the end of the last complete record in the log
pub fn valid_length(path: &Path) -> io::Result<u64> {
    let mut reader = LogReader::open(path)?;
    while reader.next_record()?.is_some() {}
    Ok(reader.offset())
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
