//! Metrics registry
//!
//! Counters only, monotonic, reset only when the registry is created.
//! Components never hold a concrete registry: they receive an
//! `Arc<dyn MetricsSink>` at construction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Receiver for pipeline telemetry
///
/// Implementations must be cheap and must never fail the calling operation.
pub trait MetricsSink: Send + Sync {
    fn rows_loaded(&self, rows: u64);
    fn rows_quarantined(&self, rows: u64);
    fn rows_decode_failed(&self, rows: u64);
    fn batch_decoded(&self);
    fn flush_completed(&self, duration: Duration, files: u64, bytes: u64);
    fn flush_retried(&self);
    fn query_executed(&self);
    fn query_rejected(&self);
    fn pruned(&self, partitions: u64, files: u64);
    fn scan_bytes_read(&self, bytes: u64);
    fn orphans_removed(&self, files: u64);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn rows_loaded(&self, _rows: u64) {}
    fn rows_quarantined(&self, _rows: u64) {}
    fn rows_decode_failed(&self, _rows: u64) {}
    fn batch_decoded(&self) {}
    fn flush_completed(&self, _duration: Duration, _files: u64, _bytes: u64) {}
    fn flush_retried(&self) {}
    fn query_executed(&self) {}
    fn query_rejected(&self) {}
    fn pruned(&self, _partitions: u64, _files: u64) {}
    fn scan_bytes_read(&self, _bytes: u64) {}
    fn orphans_removed(&self, _files: u64) {}
}

/// Atomic counter registry
///
/// Relaxed ordering throughout; readers see eventually consistent totals.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    rows_loaded: AtomicU64,
    rows_quarantined: AtomicU64,
    rows_decode_failed: AtomicU64,
    batches_decoded: AtomicU64,
    flushes: AtomicU64,
    flush_duration_micros: AtomicU64,
    files_written: AtomicU64,
    bytes_written: AtomicU64,
    flush_retries: AtomicU64,
    queries_executed: AtomicU64,
    queries_rejected: AtomicU64,
    partitions_pruned: AtomicU64,
    files_pruned: AtomicU64,
    scan_bytes_read: AtomicU64,
    orphans_removed: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_loaded: self.rows_loaded.load(Ordering::Relaxed),
            rows_quarantined: self.rows_quarantined.load(Ordering::Relaxed),
            rows_decode_failed: self.rows_decode_failed.load(Ordering::Relaxed),
            batches_decoded: self.batches_decoded.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flush_duration_micros: self.flush_duration_micros.load(Ordering::Relaxed),
            files_written: self.files_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            flush_retries: self.flush_retries.load(Ordering::Relaxed),
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            queries_rejected: self.queries_rejected.load(Ordering::Relaxed),
            partitions_pruned: self.partitions_pruned.load(Ordering::Relaxed),
            files_pruned: self.files_pruned.load(Ordering::Relaxed),
            scan_bytes_read: self.scan_bytes_read.load(Ordering::Relaxed),
            orphans_removed: self.orphans_removed.load(Ordering::Relaxed),
        }
    }

    /// Current counters as a single JSON object
    pub fn to_json(&self) -> String {
        let s = self.snapshot();
        format!(
            r#"{{"rows_loaded":{},"rows_quarantined":{},"rows_decode_failed":{},"batches_decoded":{},"flushes":{},"flush_duration_micros":{},"files_written":{},"bytes_written":{},"flush_retries":{},"queries_executed":{},"queries_rejected":{},"partitions_pruned":{},"files_pruned":{},"scan_bytes_read":{},"orphans_removed":{}}}"#,
            s.rows_loaded,
            s.rows_quarantined,
            s.rows_decode_failed,
            s.batches_decoded,
            s.flushes,
            s.flush_duration_micros,
            s.files_written,
            s.bytes_written,
            s.flush_retries,
            s.queries_executed,
            s.queries_rejected,
            s.partitions_pruned,
            s.files_pruned,
            s.scan_bytes_read,
            s.orphans_removed,
        )
    }
}

impl MetricsSink for MetricsRegistry {
    fn rows_loaded(&self, rows: u64) {
        self.rows_loaded.fetch_add(rows, Ordering::Relaxed);
    }

    fn rows_quarantined(&self, rows: u64) {
        self.rows_quarantined.fetch_add(rows, Ordering::Relaxed);
    }

    fn rows_decode_failed(&self, rows: u64) {
        self.rows_decode_failed.fetch_add(rows, Ordering::Relaxed);
    }

    fn batch_decoded(&self) {
        self.batches_decoded.fetch_add(1, Ordering::Relaxed);
    }

    fn flush_completed(&self, duration: Duration, files: u64, bytes: u64) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.flush_duration_micros.fetch_add(micros, Ordering::Relaxed);
        self.files_written.fetch_add(files, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    fn flush_retried(&self) {
        self.flush_retries.fetch_add(1, Ordering::Relaxed);
    }

    fn query_executed(&self) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    fn query_rejected(&self) {
        self.queries_rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn pruned(&self, partitions: u64, files: u64) {
        self.partitions_pruned.fetch_add(partitions, Ordering::Relaxed);
        self.files_pruned.fetch_add(files, Ordering::Relaxed);
    }

    fn scan_bytes_read(&self, bytes: u64) {
        self.scan_bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    fn orphans_removed(&self, files: u64) {
        self.orphans_removed.fetch_add(files, Ordering::Relaxed);
    }
}

/// A point-in-time copy of every counter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub rows_loaded: u64,
    pub rows_quarantined: u64,
    pub rows_decode_failed: u64,
    pub batches_decoded: u64,
    pub flushes: u64,
    pub flush_duration_micros: u64,
    pub files_written: u64,
    pub bytes_written: u64,
    pub flush_retries: u64,
    pub queries_executed: u64,
    pub queries_rejected: u64,
    pub partitions_pruned: u64,
    pub files_pruned: u64,
    pub scan_bytes_read: u64,
    pub orphans_removed: u64,
}
