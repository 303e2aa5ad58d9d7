//! Buffered, partitioned writer
//!
//! Accepted rows are buffered per (source, schema id, schema version). A
//! buffer that reaches `flush_max_rows` or `flush_max_age` is flushed:
//!
//! 1. group its rows by (source_id, time bucket)
//! 2. per key write one immutable segment file, rows sorted by time
//! 3. fsync the file and the partition directory
//! 4. append one manifest entry
//! 5. fsync the manifest
//!
//! Step 4/5 is the only commit point. A crash before it leaves an orphan
//! segment that readers never see and `gc_orphans` removes.
//!
//! Each partition key has its own lock, held for the whole write. Distinct
//! keys flush on scoped threads in parallel.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use uuid::Uuid;

use crate::batch::{Batch, Value};
use crate::config::TickDbConfig;
use crate::crash_point::{maybe_crash, points};
use crate::durable::{create_dir_durable, fsync_dir};
use crate::observability::{log_event_with_fields, Event, MetricsSink};
use crate::schema::Schema;

use super::errors::{StoreError, StoreResult};
use super::layout::{parse_bucket_dir_name, Layout, PartitionKey};
use super::manifest::{append_entry, has_entry, read_manifest, ManifestEntry};
use super::retry::RetryPolicy;
use super::segment::write_segment;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreOptions {
    pub flush_max_rows: usize,
    pub flush_max_age: Duration,
    pub compression_level: i32,
    pub retry: RetryPolicy,
}

impl StoreOptions {
    pub fn from_config(config: &TickDbConfig) -> Self {
        Self {
            flush_max_rows: config.flush_max_rows,
            flush_max_age: config.flush_max_age(),
            compression_level: config.compression_level,
            retry: RetryPolicy::new(config.io_retry_attempts, config.io_retry_base_delay()),
        }
    }
}

/// What a flush committed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub partitions: BTreeSet<PartitionKey>,
    pub files_written: u64,
    pub rows_written: u64,
    pub bytes_written: u64,
}

impl FlushSummary {
    pub fn merge(&mut self, other: FlushSummary) {
        self.partitions.extend(other.partitions);
        self.files_written += other.files_written;
        self.rows_written += other.rows_written;
        self.bytes_written += other.bytes_written;
    }
}

/// Committed contents of one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    pub key: PartitionKey,
    pub file_count: usize,
    pub row_count: u64,
    pub byte_size: u64,
    pub min_ts: Option<i64>,
    pub max_ts: Option<i64>,
    pub paused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BufferKey {
    source_id: String,
    schema_id: String,
    schema_version: u32,
}

struct Buffer {
    schema: Arc<Schema>,
    names: Vec<String>,
    rows: Vec<Vec<Value>>,
    oldest: Instant,
}

/// Rows of one schema version bound for one partition
struct FlushUnit {
    key: PartitionKey,
    buffer_key: BufferKey,
    schema: Arc<Schema>,
    names: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Default)]
pub(super) struct PartitionState {
    paused: Option<String>,
}

pub struct PartitionStore {
    data_root: PathBuf,
    layout: Layout,
    options: StoreOptions,
    metrics: Arc<dyn MetricsSink>,
    buffers: Mutex<HashMap<BufferKey, Buffer>>,
    partitions: Mutex<HashMap<PartitionKey, Arc<Mutex<PartitionState>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PartitionStore {
    /// Opens the store rooted at `<data_dir>/data`
    pub fn open(
        data_dir: &Path,
        layout: Layout,
        options: StoreOptions,
        metrics: Arc<dyn MetricsSink>,
    ) -> StoreResult<Self> {
        let data_root = data_dir.join("data");
        create_dir_durable(&data_root).map_err(|e| StoreError::io_error_at_path(&data_root, e))?;

        Ok(Self {
            data_root,
            layout,
            options,
            metrics,
            buffers: Mutex::new(HashMap::new()),
            partitions: Mutex::new(HashMap::new()),
        })
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Retry policy shared by flushes and scans
    pub fn retry_policy(&self) -> RetryPolicy {
        self.options.retry
    }

    pub(super) fn metrics(&self) -> &dyn MetricsSink {
        self.metrics.as_ref()
    }

    /// Buffers the rows of an accepted batch, flushing any buffer that is due
    ///
    /// Rows bound for a paused partition are refused. The others are still
    /// buffered, and the refusal comes back as `TICKDB_PARTITION_PAUSED`
    /// naming every paused partition the batch touched.
    pub fn append(&self, batch: &Batch, schema: &Arc<Schema>) -> StoreResult<FlushSummary> {
        if batch.is_empty() {
            return Ok(FlushSummary::default());
        }
        if batch.schema_id() != schema.schema_id || batch.schema_version() != schema.version {
            return Err(StoreError::invalid_batch(format!(
                "batch is {} v{}, schema is {} v{}",
                batch.schema_id(),
                batch.schema_version(),
                schema.schema_id,
                schema.version
            )));
        }

        let time_column = batch.column(&schema.time_field).ok_or_else(|| {
            StoreError::invalid_batch(format!("batch lacks time field '{}'", schema.time_field))
        })?;
        let mut row_keys = Vec::with_capacity(batch.len());
        for value in &time_column.values {
            let ts = value.as_timestamp().ok_or_else(|| {
                StoreError::invalid_batch(format!(
                    "time field '{}' holds {} instead of a timestamp",
                    schema.time_field,
                    value.type_name()
                ))
            })?;
            row_keys.push(PartitionKey::new(batch.source_id(), self.layout.bucket_start(ts)));
        }
        let targets: BTreeSet<&PartitionKey> = row_keys.iter().collect();
        let paused: BTreeSet<&PartitionKey> =
            targets.into_iter().filter(|key| self.is_paused(key)).collect();
        let kept: Vec<Vec<Value>> = (0..batch.len())
            .filter(|row| !paused.contains(&row_keys[*row]))
            .map(|row| batch.full_row(row))
            .collect();

        let summary = if kept.is_empty() {
            FlushSummary::default()
        } else {
            self.buffer_rows(batch, schema, kept)?
        };

        if paused.is_empty() {
            return Ok(summary);
        }
        let refused = row_keys.iter().filter(|key| paused.contains(key)).count();
        let paused: Vec<&PartitionKey> = paused.into_iter().collect();
        Err(StoreError::rows_refused(&paused, refused))
    }

    fn buffer_rows(
        &self,
        batch: &Batch,
        schema: &Arc<Schema>,
        rows: Vec<Vec<Value>>,
    ) -> StoreResult<FlushSummary> {
        let buffer_key = BufferKey {
            source_id: batch.source_id().to_string(),
            schema_id: schema.schema_id.clone(),
            schema_version: schema.version,
        };

        let due = {
            let mut buffers = lock(&self.buffers);
            let buffer = buffers.entry(buffer_key.clone()).or_insert_with(|| Buffer {
                schema: Arc::clone(schema),
                names: batch.columns().iter().map(|c| c.name.clone()).collect(),
                rows: Vec::new(),
                oldest: Instant::now(),
            });
            if buffer.rows.is_empty() {
                buffer.oldest = Instant::now();
            }
            buffer.rows.extend(rows);

            let max_rows = self.options.flush_max_rows;
            let max_age = self.options.flush_max_age;
            let due_keys: Vec<BufferKey> = buffers
                .iter()
                .filter(|(_, b)| {
                    !b.rows.is_empty() && (b.rows.len() >= max_rows || b.oldest.elapsed() >= max_age)
                })
                .map(|(k, _)| k.clone())
                .collect();
            due_keys
                .into_iter()
                .filter_map(|k| buffers.remove(&k).map(|b| (k, b)))
                .collect::<Vec<_>>()
        };

        self.flush_buffers(due)
    }

    /// Flushes every buffered row
    pub fn flush_all(&self) -> StoreResult<FlushSummary> {
        let taken: Vec<_> = lock(&self.buffers).drain().collect();
        self.flush_buffers(taken)
    }

    /// Flushes the buffered rows of one source
    pub fn flush_source(&self, source_id: &str) -> StoreResult<FlushSummary> {
        let taken = {
            let mut buffers = lock(&self.buffers);
            let keys: Vec<BufferKey> = buffers
                .keys()
                .filter(|k| k.source_id == source_id)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|k| buffers.remove(&k).map(|b| (k, b)))
                .collect::<Vec<_>>()
        };
        self.flush_buffers(taken)
    }

    /// Rows waiting in buffers, across all sources
    pub fn buffered_rows(&self) -> usize {
        lock(&self.buffers).values().map(|b| b.rows.len()).sum()
    }

    fn flush_buffers(&self, taken: Vec<(BufferKey, Buffer)>) -> StoreResult<FlushSummary> {
        let units = self.plan_units(taken)?;
        if units.is_empty() {
            return Ok(FlushSummary::default());
        }

        let results: Vec<Result<FlushSummary, (StoreError, FlushUnit)>> = if units.len() == 1 {
            units.into_iter().map(|unit| self.write_unit(unit)).collect()
        } else {
            thread::scope(|scope| {
                let handles: Vec<_> = units
                    .into_iter()
                    .map(|unit| scope.spawn(move || self.write_unit(unit)))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                    .collect()
            })
        };

        let mut summary = FlushSummary::default();
        let mut first_error = None;
        for result in results {
            match result {
                Ok(done) => summary.merge(done),
                Err((err, unit)) => {
                    self.requeue(unit);
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    fn plan_units(&self, taken: Vec<(BufferKey, Buffer)>) -> StoreResult<Vec<FlushUnit>> {
        let mut units = Vec::new();
        for (buffer_key, buffer) in taken {
            let time_idx = buffer
                .names
                .iter()
                .position(|n| *n == buffer.schema.time_field)
                .ok_or_else(|| {
                    StoreError::invalid_batch(format!(
                        "buffer lacks time field '{}'",
                        buffer.schema.time_field
                    ))
                })?;

            let mut groups: BTreeMap<i64, Vec<Vec<Value>>> = BTreeMap::new();
            for row in buffer.rows {
                let ts = row[time_idx].as_timestamp().unwrap_or_default();
                groups.entry(self.layout.bucket_start(ts)).or_default().push(row);
            }

            for (bucket_start, rows) in groups {
                units.push(FlushUnit {
                    key: PartitionKey::new(buffer_key.source_id.clone(), bucket_start),
                    buffer_key: buffer_key.clone(),
                    schema: Arc::clone(&buffer.schema),
                    names: buffer.names.clone(),
                    rows,
                });
            }
        }
        Ok(units)
    }

    fn requeue(&self, unit: FlushUnit) {
        if unit.rows.is_empty() {
            return;
        }
        let mut buffers = lock(&self.buffers);
        let buffer = buffers.entry(unit.buffer_key).or_insert_with(|| Buffer {
            schema: unit.schema,
            names: unit.names,
            rows: Vec::new(),
            oldest: Instant::now(),
        });
        buffer.rows.extend(unit.rows);
    }

    fn write_unit(&self, mut unit: FlushUnit) -> Result<FlushSummary, (StoreError, FlushUnit)> {
        let partition = self.partition_lock(&unit.key);
        let mut state = lock(&partition);
        if state.paused.is_some() {
            return Err((StoreError::partition_paused(&unit.key), unit));
        }

        let time_idx = unit
            .names
            .iter()
            .position(|n| *n == unit.schema.time_field)
            .unwrap_or(0);
        unit.rows
            .sort_by_key(|row| row[time_idx].as_timestamp().unwrap_or_default());

        let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(unit.rows.len()); unit.names.len()];
        for row in &unit.rows {
            for (column, value) in columns.iter_mut().zip(row) {
                column.push(value.clone());
            }
        }

        let dir = unit.key.dir(&self.data_root);
        let file_name = format!("part-{}.seg", Uuid::new_v4());
        let file_path = dir.join(&file_name);
        let partition_name = unit.key.to_string();
        let started = Instant::now();

        log_event_with_fields(
            Event::FlushStart,
            &[("partition", &partition_name), ("rows", &unit.rows.len().to_string())],
        );
        maybe_crash(points::PARTITION_BEFORE_DATA_WRITE);

        let written = self.options.retry.run(
            || {
                create_dir_durable(&dir)?;
                let summary = write_segment(
                    &file_path,
                    &unit.schema.schema_id,
                    unit.schema.version,
                    &unit.names,
                    &columns,
                    self.options.compression_level,
                )?;
                fsync_dir(&dir)?;
                Ok(summary)
            },
            |attempt, err| self.on_retry(&partition_name, attempt, err),
        );
        let segment = match written {
            Ok(segment) => segment,
            Err((err, attempts)) => {
                let _ = fs::remove_file(&file_path);
                let err = self.pause(&mut state, &unit.key, attempts, err);
                drop(state);
                return Err((err, unit));
            }
        };

        maybe_crash(points::PARTITION_AFTER_DATA_FSYNC);

        let (min_ts, max_ts) = columns[time_idx]
            .iter()
            .filter_map(Value::as_timestamp)
            .fold((i64::MAX, i64::MIN), |(lo, hi), ts| (lo.min(ts), hi.max(ts)));
        let entry = ManifestEntry {
            file_name: file_name.clone(),
            schema_id: unit.schema.schema_id.clone(),
            schema_version: unit.schema.version,
            time_field: unit.schema.time_field.clone(),
            row_count: segment.row_count,
            byte_size: segment.byte_size,
            min_ts,
            max_ts,
            columns: segment.columns,
            committed_at: Utc::now(),
        };

        maybe_crash(points::PARTITION_BEFORE_MANIFEST_APPEND);

        let committed = self.options.retry.run(
            || append_entry(&dir, &entry),
            |attempt, err| self.on_retry(&partition_name, attempt, err),
        );
        if let Err((err, attempts)) = committed {
            let err = self.pause(&mut state, &unit.key, attempts, err);
            drop(state);
            // A failed fsync can leave the entry readable; its rows must not
            // be committed a second time. Otherwise the data file stays
            // behind as an orphan for gc_orphans.
            if has_entry(&dir, &file_name).unwrap_or(false) {
                unit.rows.clear();
            }
            return Err((err, unit));
        }

        maybe_crash(points::PARTITION_AFTER_MANIFEST_APPEND);

        let elapsed = started.elapsed();
        self.metrics.flush_completed(elapsed, 1, entry.byte_size);
        log_event_with_fields(
            Event::FlushCommitted,
            &[
                ("bytes", &entry.byte_size.to_string()),
                ("elapsed_micros", &elapsed.as_micros().to_string()),
                ("file", &file_name),
                ("partition", &partition_name),
                ("rows", &entry.row_count.to_string()),
            ],
        );

        let mut summary = FlushSummary {
            files_written: 1,
            rows_written: entry.row_count,
            bytes_written: entry.byte_size,
            ..FlushSummary::default()
        };
        summary.partitions.insert(unit.key);
        Ok(summary)
    }

    fn on_retry(&self, partition: &str, attempt: u32, err: &std::io::Error) {
        self.metrics.flush_retried();
        log_event_with_fields(
            Event::FlushRetry,
            &[
                ("attempt", &attempt.to_string()),
                ("error", &err.to_string()),
                ("partition", partition),
            ],
        );
    }

    fn pause(
        &self,
        state: &mut PartitionState,
        key: &PartitionKey,
        attempts: u32,
        err: std::io::Error,
    ) -> StoreError {
        let reason = err.to_string();
        log_event_with_fields(
            Event::PartitionPaused,
            &[
                ("attempts", &attempts.to_string()),
                ("partition", &key.to_string()),
                ("reason", &reason),
            ],
        );
        state.paused = Some(reason);
        StoreError::write_failed(key, attempts, err)
    }

    pub(super) fn partition_lock(&self, key: &PartitionKey) -> Arc<Mutex<PartitionState>> {
        let mut partitions = lock(&self.partitions);
        Arc::clone(partitions.entry(key.clone()).or_default())
    }

    fn is_paused(&self, key: &PartitionKey) -> bool {
        let state = lock(&self.partitions).get(key).cloned();
        match state {
            Some(state) => {
                let paused = lock(&state).paused.is_some();
                paused
            }
            None => false,
        }
    }

    /// Clears the paused flag. Returns false if the partition was not paused.
    pub fn resume_partition(&self, key: &PartitionKey) -> bool {
        let state = lock(&self.partitions).get(key).cloned();
        let Some(state) = state else {
            return false;
        };
        let was_paused = lock(&state).paused.take().is_some();
        if was_paused {
            log_event_with_fields(Event::PartitionResumed, &[("partition", &key.to_string())]);
        }
        was_paused
    }

    pub fn paused_partitions(&self) -> Vec<PartitionKey> {
        let partitions: Vec<_> = lock(&self.partitions)
            .iter()
            .map(|(k, s)| (k.clone(), Arc::clone(s)))
            .collect();
        let mut paused: Vec<PartitionKey> = partitions
            .into_iter()
            .filter(|(_, s)| lock(s).paused.is_some())
            .map(|(k, _)| k)
            .collect();
        paused.sort();
        paused
    }

    /// Source ids that have at least one partition directory
    pub fn sources(&self) -> StoreResult<Vec<String>> {
        let mut sources = Vec::new();
        let entries = fs::read_dir(&self.data_root)
            .map_err(|e| StoreError::io_error_at_path(&self.data_root, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io_error_at_path(&self.data_root, e))?;
            if entry.path().is_dir() {
                sources.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        sources.sort();
        Ok(sources)
    }

    /// Bucket starts present on disk for one source, ascending
    pub fn buckets(&self, source_id: &str) -> StoreResult<Vec<i64>> {
        let source_dir = self.data_root.join(source_id);
        let entries = match fs::read_dir(&source_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io_error_at_path(&source_dir, e)),
        };
        let mut buckets = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io_error_at_path(&source_dir, e))?;
            if let Some(start) = parse_bucket_dir_name(&entry.file_name().to_string_lossy()) {
                if entry.path().is_dir() {
                    buckets.push(start);
                }
            }
        }
        buckets.sort_unstable();
        Ok(buckets)
    }

    /// Committed file, row and byte totals per partition
    pub fn partitions(&self, source_id: Option<&str>) -> StoreResult<Vec<PartitionInfo>> {
        let sources = match source_id {
            Some(id) => vec![id.to_string()],
            None => self.sources()?,
        };
        let paused: BTreeSet<PartitionKey> = self.paused_partitions().into_iter().collect();

        let mut infos = Vec::new();
        for source in sources {
            for bucket_start in self.buckets(&source)? {
                let key = PartitionKey::new(source.clone(), bucket_start);
                let dir = key.dir(&self.data_root);
                let entries = read_manifest(&dir).map_err(|e| StoreError::from_read(&dir, e))?;
                infos.push(PartitionInfo {
                    file_count: entries.len(),
                    row_count: entries.iter().map(|e| e.row_count).sum(),
                    byte_size: entries.iter().map(|e| e.byte_size).sum(),
                    min_ts: entries.iter().map(|e| e.min_ts).min(),
                    max_ts: entries.iter().map(|e| e.max_ts).max(),
                    paused: paused.contains(&key),
                    key,
                });
            }
        }
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::InputFormat;
    use crate::observability::{MetricsRegistry, NoopMetrics};
    use crate::schema::{FieldDef, FieldType};
    use crate::store::layout::LAYOUT_FORMAT_VERSION;
    use crate::store::segment::SegmentReader;
    use tempfile::TempDir;

    const HOUR: i64 = 3_600 * 1_000_000_000;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(
            "ticks",
            1,
            vec![
                FieldDef::required("ts", FieldType::Timestamp),
                FieldDef::required("price", FieldType::Float64),
            ],
            "ts",
        ))
    }

    fn options(flush_max_rows: usize) -> StoreOptions {
        StoreOptions {
            flush_max_rows,
            flush_max_age: Duration::from_secs(3_600),
            compression_level: 1,
            retry: RetryPolicy::new(2, Duration::ZERO),
        }
    }

    fn open_store(dir: &Path, flush_max_rows: usize) -> PartitionStore {
        let layout = Layout {
            format_version: LAYOUT_FORMAT_VERSION,
            bucket_width_secs: 3_600,
        };
        PartitionStore::open(dir, layout, options(flush_max_rows), Arc::new(NoopMetrics)).unwrap()
    }

    fn batch(source: &str, times: &[i64]) -> Batch {
        let schema = schema();
        let mut batch = Batch::new(&schema, source, 0, InputFormat::Ndjson);
        for (i, ts) in times.iter().enumerate() {
            batch.push_row(
                vec![Value::Timestamp(*ts), Value::Float64(i as f64)],
                Default::default(),
            );
        }
        batch
    }

    // =========================================================================
    // Buffering and flushing
    // =========================================================================

    #[test]
    fn test_rows_stay_buffered_below_threshold() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(temp_dir.path(), 100);

        let summary = store.append(&batch("feed", &[1, 2, 3]), &schema()).unwrap();
        assert_eq!(summary.files_written, 0);
        assert_eq!(store.buffered_rows(), 3);
        assert!(store.partitions(None).unwrap().is_empty());
    }

    #[test]
    fn test_row_threshold_triggers_flush() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(temp_dir.path(), 3);

        let summary = store.append(&batch("feed", &[1, 2, 3]), &schema()).unwrap();
        assert_eq!(summary.files_written, 1);
        assert_eq!(summary.rows_written, 3);
        assert_eq!(store.buffered_rows(), 0);
    }

    #[test]
    fn test_flush_groups_by_bucket_and_sorts_by_time() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(temp_dir.path(), 1_000);

        store
            .append(&batch("feed", &[HOUR + 5, 10, HOUR + 1, 2]), &schema())
            .unwrap();
        let summary = store.flush_all().unwrap();
        assert_eq!(summary.partitions.len(), 2);
        assert_eq!(summary.files_written, 2);

        let infos = store.partitions(Some("feed")).unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].min_ts, Some(2));
        assert_eq!(infos[0].max_ts, Some(10));
        assert_eq!(infos[1].min_ts, Some(HOUR + 1));

        let dir = infos[1].key.dir(store.data_root());
        let entry = &read_manifest(&dir).unwrap()[0];
        let mut reader = SegmentReader::open(&dir.join(&entry.file_name)).unwrap();
        assert_eq!(
            reader.read_column("ts").unwrap().unwrap(),
            vec![Value::Timestamp(HOUR + 1), Value::Timestamp(HOUR + 5)]
        );
    }

    #[test]
    fn test_flush_source_leaves_other_sources_buffered() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(temp_dir.path(), 1_000);

        store.append(&batch("a", &[1]), &schema()).unwrap();
        store.append(&batch("b", &[1, 2]), &schema()).unwrap();

        let summary = store.flush_source("a").unwrap();
        assert_eq!(summary.rows_written, 1);
        assert_eq!(store.buffered_rows(), 2);
        assert_eq!(store.sources().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_flush_reports_metrics() {
        let temp_dir = TempDir::new().unwrap();
        let metrics = Arc::new(MetricsRegistry::new());
        let layout = Layout {
            format_version: LAYOUT_FORMAT_VERSION,
            bucket_width_secs: 3_600,
        };
        let store =
            PartitionStore::open(temp_dir.path(), layout, options(1_000), metrics.clone()).unwrap();

        store.append(&batch("feed", &[1, HOUR]), &schema()).unwrap();
        store.flush_all().unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.flushes, 2);
        assert_eq!(snapshot.files_written, 2);
        assert!(snapshot.bytes_written > 0);
    }

    // =========================================================================
    // Pausing
    // =========================================================================

    #[test]
    fn test_exhausted_retries_pause_partition_until_resumed() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(temp_dir.path(), 1_000);

        // A regular file where the partition directory should go
        let key = PartitionKey::new("feed", 0);
        let blocked = key.dir(store.data_root());
        fs::create_dir_all(blocked.parent().unwrap()).unwrap();
        fs::write(&blocked, b"not a directory").unwrap();

        store.append(&batch("feed", &[1, 2]), &schema()).unwrap();
        let err = store.flush_all().unwrap_err();
        assert_eq!(err.code(), crate::store::StoreErrorCode::TickdbStoreWriteFailed);
        assert_eq!(store.paused_partitions(), vec![key.clone()]);
        assert_eq!(store.buffered_rows(), 2);

        let err = store.append(&batch("feed", &[3]), &schema()).unwrap_err();
        assert_eq!(err.code(), crate::store::StoreErrorCode::TickdbPartitionPaused);

        fs::remove_file(&blocked).unwrap();
        assert!(store.resume_partition(&key));
        let summary = store.flush_all().unwrap();
        assert_eq!(summary.rows_written, 2);
        assert!(store.paused_partitions().is_empty());
    }

    #[test]
    fn test_paused_partition_refuses_only_its_own_rows() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(temp_dir.path(), 1_000);

        let key = PartitionKey::new("feed", 0);
        let blocked = key.dir(store.data_root());
        fs::create_dir_all(blocked.parent().unwrap()).unwrap();
        fs::write(&blocked, b"not a directory").unwrap();

        store.append(&batch("feed", &[1]), &schema()).unwrap();
        assert!(store.flush_all().is_err());
        assert_eq!(store.paused_partitions(), vec![key.clone()]);

        let err = store
            .append(&batch("feed", &[2, HOUR + 1, HOUR + 2]), &schema())
            .unwrap_err();
        assert_eq!(err.code(), crate::store::StoreErrorCode::TickdbPartitionPaused);
        assert!(err.message().starts_with("1 rows refused"));
        assert!(err.message().contains(&key.to_string()));
        // The requeued row plus the two for the healthy hour
        assert_eq!(store.buffered_rows(), 3);

        // The paused unit fails again; the healthy one still commits
        assert!(store.flush_all().is_err());
        let infos = store.partitions(Some("feed")).unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].key, PartitionKey::new("feed", HOUR));
        assert_eq!(infos[0].row_count, 2);
    }

    #[test]
    fn test_batch_schema_mismatch_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(temp_dir.path(), 10);

        let mut other = (*schema()).clone();
        other.version = 2;
        let err = store.append(&batch("feed", &[1]), &Arc::new(other)).unwrap_err();
        assert_eq!(err.code(), crate::store::StoreErrorCode::TickdbInvalidBatch);
    }
}
