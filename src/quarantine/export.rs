//! Lazy export of quarantined records
//!
//! An export fixes the set of logs when it is created and reads them record
//! by record on demand. Each call to `iter` starts again from the beginning
//! and sees whatever has been appended since. Records a replay has already
//! stored are skipped.

use std::collections::BTreeSet;
use std::path::PathBuf;

use super::errors::{QuarantineError, QuarantineResult};
use super::log::LogReader;
use super::marker::read_markers;
use super::record::QuarantineRecord;

/// Where a record sits: its log and its byte offset in that log
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordPosition {
    pub log: PathBuf,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub position: RecordPosition,
    pub record: QuarantineRecord,
}

#[derive(Debug, Clone)]
pub struct QuarantineExport {
    files: Vec<PathBuf>,
}

impl QuarantineExport {
    pub(super) fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn iter(&self) -> QuarantineIter {
        QuarantineIter {
            entries: self.entries(),
        }
    }

    /// Like `iter`, with each record's position
    pub fn entries(&self) -> QuarantineEntries {
        QuarantineEntries {
            files: self.files.clone().into_iter(),
            current: None,
            failed: false,
        }
    }
}

impl IntoIterator for &QuarantineExport {
    type Item = QuarantineResult<QuarantineRecord>;
    type IntoIter = QuarantineIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct QuarantineIter {
    entries: QuarantineEntries,
}

impl Iterator for QuarantineIter {
    type Item = QuarantineResult<QuarantineRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next().map(|entry| entry.map(|e| e.record))
    }
}

struct OpenLog {
    path: PathBuf,
    reader: LogReader,
    replayed: BTreeSet<u64>,
}

/// Stops after the first error
pub struct QuarantineEntries {
    files: std::vec::IntoIter<PathBuf>,
    current: Option<OpenLog>,
    failed: bool,
}

impl QuarantineEntries {
    fn open_next(&mut self) -> Option<QuarantineResult<()>> {
        let path = self.files.next()?;
        let replayed = match read_markers(&path) {
            Ok(replayed) => replayed,
            Err(e) => return Some(Err(QuarantineError::from_read(&path, e))),
        };
        match LogReader::open(&path) {
            Ok(reader) => {
                self.current = Some(OpenLog {
                    path,
                    reader,
                    replayed,
                });
                Some(Ok(()))
            }
            Err(e) => Some(Err(QuarantineError::io_error(&path, e))),
        }
    }
}

impl Iterator for QuarantineEntries {
    type Item = QuarantineResult<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if self.current.is_none() {
                if let Err(e) = self.open_next()? {
                    self.failed = true;
                    return Some(Err(e));
                }
            }

            let log = self.current.as_mut()?;
            let offset = log.reader.offset();
            match log.reader.next_record() {
                Ok(Some(_)) if log.replayed.contains(&offset) => continue,
                Ok(Some(record)) => {
                    let position = RecordPosition {
                        log: log.path.clone(),
                        offset,
                    };
                    return Some(Ok(LogEntry { position, record }));
                }
                Ok(None) => self.current = None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(QuarantineError::from_read(&log.path, e)));
                }
            }
        }
    }
}
