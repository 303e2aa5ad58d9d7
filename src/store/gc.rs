//! Orphan segment collection
//!
//! A segment file becomes visible only through its manifest line. Files left
//! behind by a crash between the data fsync and the manifest append are
//! orphans: never readable, safe to delete.

use std::collections::HashSet;
use std::fs;

use crate::crash_point::{maybe_crash, points};
use crate::durable::fsync_dir;
use crate::observability::{log_event_with_fields, Event};

use super::errors::{StoreError, StoreResult};
use super::layout::PartitionKey;
use super::manifest::read_manifest;
use super::partition::PartitionStore;

pub const SEGMENT_EXTENSION: &str = "seg";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub files_removed: u64,
    pub bytes_reclaimed: u64,
}

impl PartitionStore {
    /// Deletes segment files that no manifest entry references
    ///
    /// Each partition is swept under its lock, so an in-flight flush is
    /// never mistaken for an orphan.
    pub fn gc_orphans(&self) -> StoreResult<GcReport> {
        let mut report = GcReport::default();

        for source in self.sources()? {
            for bucket_start in self.buckets(&source)? {
                let key = PartitionKey::new(source.clone(), bucket_start);
                let swept = self.gc_partition(&key)?;
                report.files_removed += swept.files_removed;
                report.bytes_reclaimed += swept.bytes_reclaimed;
            }
        }

        Ok(report)
    }

    fn gc_partition(&self, key: &PartitionKey) -> StoreResult<GcReport> {
        let partition = self.partition_lock(key);
        let _guard = partition.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let dir = key.dir(self.data_root());
        let committed: HashSet<String> = read_manifest(&dir)
            .map_err(|e| StoreError::from_read(&dir, e))?
            .into_iter()
            .map(|entry| entry.file_name)
            .collect();

        let mut report = GcReport::default();
        let entries = fs::read_dir(&dir).map_err(|e| StoreError::io_error_at_path(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io_error_at_path(&dir, e))?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_segment = path.extension().map_or(false, |ext| ext == SEGMENT_EXTENSION);
            if !is_segment || committed.contains(&name) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            maybe_crash(points::GC_BEFORE_REMOVE);
            fs::remove_file(&path).map_err(|e| StoreError::io_error_at_path(&path, e))?;

            report.files_removed += 1;
            report.bytes_reclaimed += size;
            log_event_with_fields(
                Event::OrphanRemoved,
                &[
                    ("bytes", &size.to_string()),
                    ("file", &name),
                    ("partition", &key.to_string()),
                ],
            );
        }

        if report.files_removed > 0 {
            fsync_dir(&dir).map_err(|e| StoreError::io_error_at_path(&dir, e))?;
            self.metrics().orphans_removed(report.files_removed);
        }
        Ok(report)
    }
}
