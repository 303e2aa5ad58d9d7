//! The `TickDb` facade
//!
//! Opening a data root brings the subsystems up in order:
//!
//! 1. data root and `layout.json`
//! 2. schema registry
//! 3. partition store
//! 4. quarantine sink
//! 5. query engine
//!
//! A load decodes on the pipeline's worker thread; validation, quarantine
//! and buffering run on the caller. Every load ends by flushing its source,
//! so a read that follows sees every accepted row.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::Serialize;

use crate::batch::Batch;
use crate::config::TickDbConfig;
use crate::durable::create_dir_durable;
use crate::errors::{TickDbError, TickDbResult};
use crate::loader::{start_pipeline, DecodeContext, LoadOptions, Source};
use crate::observability::{
    log_event_with_fields, Event, MetricsRegistry, MetricsSink, MetricsSnapshot, ObservationScope,
};
use crate::quarantine::{records_for, replay, QuarantineExport, QuarantineSink, Replayer};
use crate::query::{QueryEngine, QueryPredicate, RowStream, ScanPlan};
use crate::schema::{Registration, Schema, SchemaRegistry};
use crate::store::{
    is_valid_source_id, FlushSummary, GcReport, Layout, PartitionInfo, PartitionKey, PartitionStore,
    StoreError, StoreOptions,
};
use crate::validator::{ReasonCode, ValidationContext, ValidationOutcome, Validator};

/// Row counts of one load or append
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub rows_loaded: u64,
    pub rows_quarantined: u64,
    pub partitions_written: u64,
}

/// Outcome of replaying quarantined rows
///
/// Rows that still fail stay in the quarantine and are replayed again next
/// time; stored ones leave every later export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub records_replayed: u64,
    pub rows_loaded: u64,
    pub rows_still_rejected: u64,
    pub partitions_written: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub data_root_present: bool,
    pub schema_count: usize,
    pub paused_partitions: Vec<String>,
}

pub struct TickDb {
    config: TickDbConfig,
    registry: RwLock<SchemaRegistry>,
    store: Arc<PartitionStore>,
    quarantine: QuarantineSink,
    query: QueryEngine,
    metrics: Arc<dyn MetricsSink>,
    counters: Option<Arc<MetricsRegistry>>,
    replay_lock: Mutex<()>,
}

impl TickDb {
    /// Opens (creating if needed) the data root with a fresh metrics registry
    pub fn open(config: TickDbConfig) -> TickDbResult<Self> {
        let counters = Arc::new(MetricsRegistry::new());
        let mut db = Self::open_with_metrics(config, counters.clone())?;
        db.counters = Some(counters);
        Ok(db)
    }

    /// Opens the data root reporting telemetry to `metrics`
    pub fn open_with_metrics(config: TickDbConfig, metrics: Arc<dyn MetricsSink>) -> TickDbResult<Self> {
        config.validate()?;
        let data_dir = config.data_dir.clone();
        let dir = data_dir.display().to_string();
        log_event_with_fields(Event::OpenStart, &[("data_dir", &dir)]);

        create_dir_durable(&data_dir).map_err(|e| TickDbError::io(format!("creating {}", dir), e))?;
        let layout = Layout::open_or_create(&data_dir, config.bucket_width_secs)
            .map_err(|e| TickDbError::io(format!("reading layout under {}", dir), e))?;

        let registry = SchemaRegistry::open(&data_dir)?;
        let store = Arc::new(PartitionStore::open(
            &data_dir,
            layout,
            StoreOptions::from_config(&config),
            Arc::clone(&metrics),
        )?);
        let quarantine = QuarantineSink::open(&data_dir, Arc::clone(&metrics))?;
        let query = QueryEngine::new(Arc::clone(&store), Arc::clone(&metrics));

        let schemas = registry.schema_count().to_string();
        let width = layout.bucket_width_secs.to_string();
        log_event_with_fields(
            Event::OpenComplete,
            &[("data_dir", &dir), ("schemas", &schemas), ("bucket_width_secs", &width)],
        );

        Ok(Self {
            config,
            registry: RwLock::new(registry),
            store,
            quarantine,
            query,
            metrics,
            counters: None,
            replay_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &TickDbConfig {
        &self.config
    }

    /// Counters, when the database owns its metrics registry
    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        self.counters.as_ref().map(|c| c.snapshot())
    }

    fn registry(&self) -> RwLockReadGuard<'_, SchemaRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, SchemaRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Schemas
    // =========================================================================

    pub fn register_schema(&self, schema: Schema) -> TickDbResult<Registration> {
        Ok(self.registry_mut().register(schema)?)
    }

    /// The requested version, or the latest when `version` is `None`
    pub fn schema(&self, schema_id: &str, version: Option<u32>) -> TickDbResult<Arc<Schema>> {
        Ok(self.registry().get(schema_id, version)?)
    }

    pub fn list_schemas(&self) -> Vec<(String, u32)> {
        self.registry().list()
    }

    // =========================================================================
    // Ingest
    // =========================================================================

    /// Loads a raw input against the latest version of `schema_id`
    ///
    /// Row-level problems are quarantined and counted, never raised.
    pub fn load<R>(&self, source_id: &str, input: R, schema_id: &str) -> TickDbResult<LoadReport>
    where
        R: Read + Send + 'static,
    {
        check_source_id(source_id)?;
        let schema = self.schema(schema_id, None)?;
        let validator = Validator::new(Arc::clone(&schema))?;

        let schema_label = format!("{}_v{}", schema.schema_id, schema.version);
        log_event_with_fields(
            Event::IngestStart,
            &[("source_id", source_id), ("schema", &schema_label)],
        );

        let result = self.load_inner(source_id, Box::new(BufReader::new(input)), &validator);
        match &result {
            Ok(report) => log_report(Event::IngestComplete, source_id, report),
            Err(e) => log_event_with_fields(
                Event::IngestFailed,
                &[("source_id", source_id), ("code", e.code()), ("error", &e.to_string())],
            ),
        }
        result
    }

    fn load_inner(&self, source_id: &str, source: Source, validator: &Validator) -> TickDbResult<LoadReport> {
        let schema = validator.schema();
        let context = DecodeContext {
            schema: Arc::clone(schema),
            source_id: source_id.to_string(),
            ingest_ts: now_nanos(),
        };
        let options = LoadOptions::from_config(&self.config);

        let Some((_format, pipeline)) =
            start_pipeline(source, context, options, Arc::clone(&self.metrics))?
        else {
            return Ok(LoadReport::default());
        };

        let mut report = LoadReport::default();
        let mut partitions = BTreeSet::new();
        let mut validation = ValidationContext::from_config(&self.config);

        for batch in pipeline {
            let batch = batch?;
            let outcome = validator.validate(&batch, &validation);
            validation.watermark = outcome.watermark;
            self.route(&batch, outcome, schema, &mut report, &mut partitions)?;
        }

        partitions.extend(self.store.flush_source(source_id)?.partitions);
        report.partitions_written = partitions.len() as u64;
        Ok(report)
    }

    /// Quarantines the rejects, then buffers the accepted rows
    fn route(
        &self,
        batch: &Batch,
        outcome: ValidationOutcome,
        schema: &Arc<Schema>,
        report: &mut LoadReport,
        partitions: &mut BTreeSet<PartitionKey>,
    ) -> TickDbResult<()> {
        let records = records_for(batch, &outcome.rejected);
        report.rows_quarantined += self.quarantine.record(&records)?;

        let accepted = outcome.accepted.len() as u64;
        partitions.extend(self.store.append(&outcome.accepted, schema)?.partitions);
        self.metrics.rows_loaded(accepted);
        report.rows_loaded += accepted;
        Ok(())
    }

    /// Opens and loads a file
    pub fn load_path(&self, source_id: &str, path: &Path, schema_id: &str) -> TickDbResult<LoadReport> {
        let file = File::open(path)
            .map_err(|e| TickDbError::io(format!("opening {}", path.display()), e))?;
        self.load(source_id, file, schema_id)
    }

    /// Validates and stores an in-memory batch; no format detection
    ///
    /// The batch must have been built for a registered version of
    /// `schema_id`. Each call is its own validation session.
    pub fn append(&self, batch: &Batch, schema_id: &str) -> TickDbResult<LoadReport> {
        check_source_id(batch.source_id())?;
        if batch.schema_id() != schema_id {
            return Err(StoreError::invalid_batch(format!(
                "batch was built for schema '{}', not '{}'",
                batch.schema_id(),
                schema_id
            ))
            .into());
        }
        let schema = self.schema(schema_id, Some(batch.schema_version()))?;
        let validator = Validator::new(Arc::clone(&schema))?;

        let mut report = LoadReport::default();
        let mut partitions = BTreeSet::new();
        let outcome = validator.validate(batch, &ValidationContext::from_config(&self.config));
        self.route(batch, outcome, &schema, &mut report, &mut partitions)?;

        partitions.extend(self.store.flush_source(batch.source_id())?.partitions);
        report.partitions_written = partitions.len() as u64;
        log_report(Event::IngestComplete, batch.source_id(), &report);
        Ok(report)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Validates the predicate and snapshots the files it may touch
    pub fn plan(&self, predicate: &QueryPredicate) -> TickDbResult<ScanPlan> {
        Ok(self.query.plan(&self.registry(), predicate)?)
    }

    pub fn read(&self, predicate: &QueryPredicate) -> TickDbResult<RowStream> {
        Ok(self.plan(predicate)?.iter())
    }

    /// Shorthand for a time-range read of selected fields
    pub fn read_range(
        &self,
        source_id: Option<&str>,
        time_start: i64,
        time_end: i64,
        fields: &[&str],
    ) -> TickDbResult<RowStream> {
        let mut predicate = QueryPredicate::new(time_start, time_end).fields(fields.iter().copied());
        if let Some(source_id) = source_id {
            predicate = predicate.source(source_id);
        }
        self.read(&predicate)
    }

    // =========================================================================
    // Quarantine
    // =========================================================================

    pub fn quarantine_export(
        &self,
        source_id: Option<&str>,
        reason: Option<ReasonCode>,
    ) -> TickDbResult<QuarantineExport> {
        if let Some(source_id) = source_id {
            check_source_id(source_id)?;
        }
        Ok(self.quarantine.export(source_id, reason)?)
    }

    /// Re-validates quarantined rows of `schema_id` against its latest version
    ///
    /// Rows that now pass are stored and their records marked replayed, so
    /// a second replay does not store them again. Records of other schemas
    /// are skipped. Replays run one at a time.
    pub fn replay_quarantine(
        &self,
        source_id: Option<&str>,
        reason: Option<ReasonCode>,
        schema_id: &str,
    ) -> TickDbResult<ReplayReport> {
        let schema = self.schema(schema_id, None)?;
        let export = self.quarantine_export(source_id, reason)?;

        let schema_label = format!("{}_v{}", schema.schema_id, schema.version);
        log_event_with_fields(
            Event::QuarantineReplayStart,
            &[
                ("source_id", source_id.unwrap_or("*")),
                ("schema", &schema_label),
            ],
        );

        let _replaying = self.replay_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut replayer = Replayer::new(
            Arc::clone(&schema),
            ValidationContext::from_config(&self.config),
            now_nanos(),
        )?;
        let entries = export
            .entries()
            .filter(|e| e.as_ref().map_or(true, |e| e.record.schema_id == schema.schema_id));
        let replays = replay(entries, &mut replayer)?;

        let mut report = ReplayReport::default();
        let mut partitions = BTreeSet::new();
        for source in replays {
            let accepted = source.outcome.accepted.len() as u64;
            let rejected = source.outcome.rejected.len() as u64;
            report.records_replayed += accepted + rejected;
            report.rows_still_rejected += rejected;

            partitions.extend(self.store.append(&source.outcome.accepted, &schema)?.partitions);
            partitions.extend(self.store.flush_source(&source.source_id)?.partitions);
            // Marked only once the rows are committed
            self.quarantine.mark_replayed(&source.accepted_positions())?;
            self.metrics.rows_loaded(accepted);
            report.rows_loaded += accepted;
        }
        report.partitions_written = partitions.len() as u64;

        let replayed = report.records_replayed.to_string();
        let loaded = report.rows_loaded.to_string();
        let rejected = report.rows_still_rejected.to_string();
        log_event_with_fields(
            Event::QuarantineReplayComplete,
            &[
                ("records_replayed", &replayed),
                ("rows_loaded", &loaded),
                ("rows_still_rejected", &rejected),
            ],
        );
        Ok(report)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Commits every buffered row
    pub fn flush(&self) -> TickDbResult<FlushSummary> {
        Ok(self.store.flush_all()?)
    }

    /// Removes data files no manifest references
    pub fn gc_orphans(&self) -> TickDbResult<GcReport> {
        let scope = ObservationScope::new("GC");
        match self.store.gc_orphans() {
            Ok(report) => {
                let removed = report.files_removed.to_string();
                let bytes = report.bytes_reclaimed.to_string();
                scope.complete_with_fields(&[("files_removed", &removed), ("bytes_reclaimed", &bytes)]);
                Ok(report)
            }
            Err(e) => {
                scope.fail(e.code().code());
                Err(e.into())
            }
        }
    }

    /// Lets a paused partition accept writes again; false if it was not paused
    pub fn resume_partition(&self, key: &PartitionKey) -> bool {
        self.store.resume_partition(key)
    }

    pub fn partitions(&self, source_id: Option<&str>) -> TickDbResult<Vec<PartitionInfo>> {
        if let Some(source_id) = source_id {
            check_source_id(source_id)?;
        }
        Ok(self.store.partitions(source_id)?)
    }

    /// Sources with committed data
    pub fn list_sources(&self) -> TickDbResult<Vec<String>> {
        Ok(self.store.sources()?)
    }

    pub fn health_check(&self) -> HealthReport {
        let data_root_present = self.store.data_root().is_dir();
        let paused_partitions: Vec<String> = self
            .store
            .paused_partitions()
            .iter()
            .map(ToString::to_string)
            .collect();
        HealthReport {
            healthy: data_root_present && paused_partitions.is_empty(),
            data_root_present,
            schema_count: self.registry().schema_count(),
            paused_partitions,
        }
    }

    /// Flushes everything and closes the database
    pub fn close(self) -> TickDbResult<FlushSummary> {
        self.flush()
    }
}

fn check_source_id(source_id: &str) -> TickDbResult<()> {
    if is_valid_source_id(source_id) {
        Ok(())
    } else {
        Err(TickDbError::InvalidSourceId(format!(
            "'{}' must be non-empty [A-Za-z0-9_.-] and not '.' or '..'",
            source_id
        )))
    }
}

fn log_report(event: Event, source_id: &str, report: &LoadReport) {
    let loaded = report.rows_loaded.to_string();
    let quarantined = report.rows_quarantined.to_string();
    let partitions = report.partitions_written.to_string();
    log_event_with_fields(
        event,
        &[
            ("source_id", source_id),
            ("rows_loaded", &loaded),
            ("rows_quarantined", &quarantined),
            ("partitions_written", &partitions),
        ],
    );
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
