//! Streaming scan over a planned snapshot
//!
//! Each data file is opened, its needed columns read, and the handle dropped
//! before any row is filtered. A stream holds at most one file's rows.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::batch::Value;
use crate::observability::{log_event_with_fields, Event, MetricsSink};
use crate::store::{RetryPolicy, SegmentReader};

use super::errors::{QueryError, QueryResult};
use super::predicate::ResolvedQuery;
use super::pruning::{ScanFile, Snapshot};

/// Rows from one data file, in the plan's field order
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    pub fields: Arc<[String]>,
    pub rows: Vec<Vec<Value>>,
}

impl RowBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    /// Values of one column, top to bottom
    pub fn column<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a Value> + 'a> {
        let index = self.field_index(name)?;
        Some(self.rows.iter().map(move |row| &row[index]))
    }

    /// One row as a JSON object keyed by field name
    pub fn row_json(&self, row: usize) -> serde_json::Value {
        let object = self
            .fields
            .iter()
            .zip(&self.rows[row])
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        serde_json::Value::Object(object)
    }
}

/// Pruning and I/O counters for one plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub partitions_scanned: u64,
    pub partitions_pruned: u64,
    pub files_scanned: u64,
    pub files_pruned: u64,
}

struct PlanInner {
    query: ResolvedQuery,
    fields: Arc<[String]>,
    files: Vec<ScanFile>,
    stats: ScanStats,
    retry: RetryPolicy,
    metrics: Arc<dyn MetricsSink>,
}

/// A validated query bound to a manifest snapshot
///
/// Cheap to clone. Every call to `iter` scans the same snapshot again from
/// the first file; commits made after planning are never seen.
#[derive(Clone)]
pub struct ScanPlan {
    inner: Arc<PlanInner>,
}

impl std::fmt::Debug for ScanPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanPlan")
            .field("fields", &self.inner.fields)
            .field("stats", &self.inner.stats)
            .finish_non_exhaustive()
    }
}

impl ScanPlan {
    pub(super) fn new(
        query: ResolvedQuery,
        snapshot: Snapshot,
        retry: RetryPolicy,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let stats = ScanStats {
            partitions_scanned: snapshot.partitions_scanned,
            partitions_pruned: snapshot.partitions_pruned,
            files_scanned: snapshot.files.len() as u64,
            files_pruned: snapshot.files_pruned,
        };
        Self {
            inner: Arc::new(PlanInner {
                fields: query.fields.clone().into(),
                query,
                files: snapshot.files,
                stats,
                retry,
                metrics,
            }),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.inner.fields
    }

    pub fn files(&self) -> &[ScanFile] {
        &self.inner.files
    }

    pub fn stats(&self) -> ScanStats {
        self.inner.stats
    }

    pub fn iter(&self) -> RowStream {
        RowStream {
            plan: Arc::clone(&self.inner),
            next_file: 0,
            rows_emitted: 0,
            bytes_read: 0,
            finished: false,
        }
    }
}

impl IntoIterator for &ScanPlan {
    type Item = QueryResult<RowBatch>;
    type IntoIter = RowStream;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy sequence of row batches; stops after the first error
pub struct RowStream {
    plan: Arc<PlanInner>,
    next_file: usize,
    rows_emitted: usize,
    bytes_read: u64,
    finished: bool,
}

impl RowStream {
    /// Data file bytes read so far by this stream
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn rows_emitted(&self) -> usize {
        self.rows_emitted
    }

    fn remaining(&self) -> Option<usize> {
        self.plan
            .query
            .limit
            .map(|limit| limit.saturating_sub(self.rows_emitted))
    }

    fn finish(&mut self) {
        self.finished = true;
        self.plan.metrics.query_executed();
        let rows = self.rows_emitted.to_string();
        let bytes = self.bytes_read.to_string();
        log_event_with_fields(
            Event::QueryExecuted,
            &[("rows", &rows), ("bytes_read", &bytes)],
        );
    }
}

impl Iterator for RowStream {
    type Item = QueryResult<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            let remaining = self.remaining();
            if remaining == Some(0) || self.next_file >= self.plan.files.len() {
                self.finish();
                return None;
            }

            let file = &self.plan.files[self.next_file];
            self.next_file += 1;

            let (mut rows, bytes) = match scan_file(file, &self.plan.query, &self.plan.retry) {
                Ok(scanned) => scanned,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };
            self.bytes_read += bytes;
            self.plan.metrics.scan_bytes_read(bytes);

            if let Some(remaining) = remaining {
                rows.truncate(remaining);
            }
            if rows.is_empty() {
                continue;
            }
            self.rows_emitted += rows.len();
            return Some(Ok(RowBatch {
                fields: Arc::clone(&self.plan.fields),
                rows,
            }));
        }
    }
}

/// Reads one file and returns its matching rows plus the bytes read
fn scan_file(
    file: &ScanFile,
    query: &ResolvedQuery,
    retry: &RetryPolicy,
) -> QueryResult<(Vec<Vec<Value>>, u64)> {
    let time_field = file.entry.time_field.as_str();
    let check_time = !file.within(query.time_start, query.time_end);

    let mut needed: Vec<&str> = query.fields.iter().map(String::as_str).collect();
    needed.extend(query.filters.iter().map(|f| f.field.as_str()));
    if check_time {
        needed.push(time_field);
    }
    needed.sort_unstable();
    needed.dedup();

    let (columns, bytes) = retry
        .run(
            || read_columns(&file.path, &needed),
            |attempt, e| {
                let attempt = attempt.to_string();
                let error = e.to_string();
                log_event_with_fields(
                    Event::ScanRetry,
                    &[
                        ("partition", &file.key.to_string()),
                        ("file", &file.entry.file_name),
                        ("attempt", &attempt),
                        ("error", &error),
                    ],
                );
            },
        )
        .map_err(|(e, _)| QueryError::from_read(&file.path, e))?;

    let row_count = file.entry.row_count as usize;

    // A filter on a column the file lacks cannot match any row
    if query
        .filters
        .iter()
        .any(|f| columns.get(&f.field).map_or(true, Option::is_none))
    {
        return Ok((Vec::new(), bytes));
    }

    let mut rows = Vec::new();
    for row in 0..row_count {
        if check_time {
            let in_range = value_at(&columns, time_field, row)
                .and_then(Value::as_timestamp)
                .is_some_and(|ts| ts >= query.time_start && ts <= query.time_end);
            if !in_range {
                continue;
            }
        }
        let passes = query.filters.iter().all(|filter| {
            value_at(&columns, &filter.field, row).is_some_and(|value| filter.op.matches(value))
        });
        if !passes {
            continue;
        }
        rows.push(
            query
                .fields
                .iter()
                .map(|name| value_at(&columns, name, row).cloned().unwrap_or(Value::Null))
                .collect(),
        );
    }
    Ok((rows, bytes))
}

fn value_at<'a>(
    columns: &'a HashMap<String, Option<Vec<Value>>>,
    name: &str,
    row: usize,
) -> Option<&'a Value> {
    columns.get(name).and_then(Option::as_ref).map(|c| &c[row])
}

/// Reads the named columns; the file is closed on return
fn read_columns(
    path: &Path,
    names: &[&str],
) -> io::Result<(HashMap<String, Option<Vec<Value>>>, u64)> {
    let mut reader = SegmentReader::open(path)?;
    let mut columns = HashMap::with_capacity(names.len());
    for name in names {
        columns.insert(name.to_string(), reader.read_column(name)?);
    }
    Ok((columns, reader.bytes_read()))
}
