//! Durable quarantine sink
//!
//! Rejected rows go to `quarantine/<source_id>/<reason>.qlog`, one
//! append-only checksummed log per source and reason. A record call returns
//! only after every touched log has been fsynced. Replayed records are
//! marked in a sidecar file rather than removed from the log.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::crash_point::{maybe_crash, points};
use crate::durable::{create_dir_durable, fsync_dir};
use crate::observability::{log_event_with_fields, Event, MetricsSink};
use crate::validator::ReasonCode;

use super::errors::{QuarantineError, QuarantineResult};
use super::export::{QuarantineExport, RecordPosition};
use super::log::valid_length;
use super::marker::append_markers;
use super::record::QuarantineRecord;

pub const QUARANTINE_DIR: &str = "quarantine";
pub const LOG_EXTENSION: &str = "qlog";

pub struct QuarantineSink {
    root: PathBuf,
    metrics: Arc<dyn MetricsSink>,
    /// Length of each log after this process last appended to it; a log
    /// whose length differs gets its tail repaired first. Also serializes
    /// appends.
    lengths: Mutex<HashMap<PathBuf, u64>>,
}

impl QuarantineSink {
    pub fn open(data_dir: &Path, metrics: Arc<dyn MetricsSink>) -> QuarantineResult<Self> {
        let root = data_dir.join(QUARANTINE_DIR);
        create_dir_durable(&root).map_err(|e| QuarantineError::io_error(&root, e))?;
        Ok(Self {
            root,
            metrics,
            lengths: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_path(&self, source_id: &str, reason: ReasonCode) -> PathBuf {
        self.root
            .join(source_id)
            .join(format!("{}.{}", reason.as_str(), LOG_EXTENSION))
    }

    /// Appends the records durably, grouped by source and reason
    pub fn record(&self, records: &[QuarantineRecord]) -> QuarantineResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut groups: BTreeMap<(&str, ReasonCode), Vec<&QuarantineRecord>> = BTreeMap::new();
        for record in records {
            groups
                .entry((record.source_id.as_str(), record.reason))
                .or_default()
                .push(record);
        }

        let mut lengths = self.lengths.lock().unwrap_or_else(PoisonError::into_inner);
        for ((source_id, reason), group) in groups {
            let path = self.log_path(source_id, reason);
            let current = log_length(&path)?;
            let start = match lengths.remove(&path) {
                Some(expected) if expected == current => current,
                _ => self.repair_tail(&path, current)?,
            };
            let end = self.append(&path, start, &group)?;
            lengths.insert(path, end);

            log_event_with_fields(
                Event::QuarantineRecorded,
                &[
                    ("reason", reason.as_str()),
                    ("rows", &group.len().to_string()),
                    ("source_id", source_id),
                ],
            );
            if reason == ReasonCode::DecodeError {
                self.metrics.rows_decode_failed(group.len() as u64);
            }
        }
        drop(lengths);

        self.metrics.rows_quarantined(records.len() as u64);
        Ok(records.len() as u64)
    }

    /// Appends after `start`, returning the new length
    ///
    /// A failed write is cut back to `start` where possible so no torn
    /// record sits in front of the next append.
    fn append(&self, path: &Path, start: u64, group: &[&QuarantineRecord]) -> QuarantineResult<u64> {
        let dir = path.parent().unwrap_or(&self.root);
        create_dir_durable(dir).map_err(|e| QuarantineError::io_error(dir, e))?;

        let mut bytes = Vec::new();
        for record in group {
            bytes.extend_from_slice(&record.serialize());
        }

        let created = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| QuarantineError::io_error(path, e))?;

        maybe_crash(points::QUARANTINE_BEFORE_APPEND);
        if let Err(e) = file.write_all(&bytes).and_then(|_| file.sync_all()) {
            let _ = file.set_len(start).and_then(|_| file.sync_all());
            return Err(QuarantineError::io_error(path, e));
        }
        if created {
            fsync_dir(dir).map_err(|e| QuarantineError::io_error(dir, e))?;
        }
        maybe_crash(points::QUARANTINE_AFTER_FSYNC);
        Ok(start + bytes.len() as u64)
    }

    /// Cuts off a torn record left at the end of the log, returning the
    /// length that remains
    fn repair_tail(&self, path: &Path, file_len: u64) -> QuarantineResult<u64> {
        if file_len == 0 {
            return Ok(0);
        }
        let valid = valid_length(path).map_err(|e| QuarantineError::from_read(path, e))?;
        if valid < file_len {
            let file = OpenOptions::new()
                .write(true)
                .open(path)
                .map_err(|e| QuarantineError::io_error(path, e))?;
            file.set_len(valid)
                .and_then(|_| file.sync_all())
                .map_err(|e| QuarantineError::io_error(path, e))?;
        }
        Ok(valid)
    }

    /// Durably marks records whose rows a replay has stored
    ///
    /// Marked records drop out of every later export and replay.
    pub fn mark_replayed(&self, positions: &[RecordPosition]) -> QuarantineResult<()> {
        let mut by_log: BTreeMap<&Path, Vec<u64>> = BTreeMap::new();
        for position in positions {
            by_log.entry(position.log.as_path()).or_default().push(position.offset);
        }

        let _lengths = self.lengths.lock().unwrap_or_else(PoisonError::into_inner);
        for (log, offsets) in by_log {
            append_markers(log, &offsets).map_err(|e| QuarantineError::io_error(log, e))?;
            log_event_with_fields(
                Event::QuarantineReplayMarked,
                &[("log", &log.display().to_string()), ("records", &offsets.len().to_string())],
            );
        }
        Ok(())
    }

    /// Lazy, restartable view over the matching logs
    pub fn export(
        &self,
        source_id: Option<&str>,
        reason: Option<ReasonCode>,
    ) -> QuarantineResult<QuarantineExport> {
        let sources = match source_id {
            Some(id) => vec![id.to_string()],
            None => list_dirs(&self.root)?,
        };
        let reasons: Vec<ReasonCode> = match reason {
            Some(r) => vec![r],
            None => ReasonCode::ALL.to_vec(),
        };

        let mut files = Vec::new();
        for source in &sources {
            for reason in &reasons {
                let path = self.log_path(source, *reason);
                if path.is_file() {
                    files.push(path);
                }
            }
        }
        Ok(QuarantineExport::new(files))
    }

    /// Source ids with at least one quarantine log
    pub fn sources(&self) -> QuarantineResult<Vec<String>> {
        list_dirs(&self.root)
    }
}

fn log_length(path: &Path) -> QuarantineResult<u64> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(QuarantineError::io_error(path, e)),
    }
}

fn list_dirs(root: &Path) -> QuarantineResult<Vec<String>> {
    let mut names = Vec::new();
    let entries = fs::read_dir(root).map_err(|e| QuarantineError::io_error(root, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| QuarantineError::io_error(root, e))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
