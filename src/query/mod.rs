//! Predicate-pushdown reads over committed partitions
//!
//! Planning happens in three steps, none of which reads a data file:
//!
//! 1. resolve the predicate against the schemas in scope
//! 2. prune buckets by name and manifest entries by their statistics
//! 3. bind the surviving files into a `ScanPlan`
//!
//! The plan then streams `RowBatch`es, one data file at a time.

mod errors;
mod predicate;
mod pruning;
mod scan;

pub use errors::{QueryError, QueryErrorCode, QueryResult};
pub use predicate::{resolve, Filter, FilterOp, QueryPredicate, ResolvedQuery};
pub use pruning::{may_match, snapshot, ScanFile, Snapshot};
pub use scan::{RowBatch, RowStream, ScanPlan, ScanStats};

use std::sync::Arc;

use crate::observability::{log_event_with_fields, Event, MetricsSink};
use crate::schema::SchemaRegistry;
use crate::store::PartitionStore;

pub struct QueryEngine {
    store: Arc<PartitionStore>,
    metrics: Arc<dyn MetricsSink>,
}

impl QueryEngine {
    pub fn new(store: Arc<PartitionStore>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { store, metrics }
    }

    /// Validates `predicate` and snapshots the files it may touch
    ///
    /// With a `schema_id`, fields resolve against that schema's latest
    /// version; otherwise against the latest version of every schema.
    pub fn plan(&self, registry: &SchemaRegistry, predicate: &QueryPredicate) -> QueryResult<ScanPlan> {
        let sources = predicate
            .sources
            .as_ref()
            .map_or_else(|| "*".to_string(), |s| s.join(","));
        log_event_with_fields(
            Event::QueryReceived,
            &[
                ("sources", &sources),
                ("schema_id", predicate.schema_id.as_deref().unwrap_or("*")),
            ],
        );

        let planned = self.plan_inner(registry, predicate);
        match &planned {
            Ok(plan) => {
                let stats = plan.stats();
                self.metrics.pruned(stats.partitions_pruned, stats.files_pruned);
                log_event_with_fields(
                    Event::QueryPlanned,
                    &[
                        ("partitions_scanned", &stats.partitions_scanned.to_string()),
                        ("partitions_pruned", &stats.partitions_pruned.to_string()),
                        ("files_scanned", &stats.files_scanned.to_string()),
                        ("files_pruned", &stats.files_pruned.to_string()),
                    ],
                );
            }
            Err(e) => {
                self.metrics.query_rejected();
                log_event_with_fields(
                    Event::QueryRejected,
                    &[("code", e.code().code()), ("reason", e.message())],
                );
            }
        }
        planned
    }

    fn plan_inner(&self, registry: &SchemaRegistry, predicate: &QueryPredicate) -> QueryResult<ScanPlan> {
        let schemas = match predicate.schema_id.as_deref() {
            Some(id) => vec![registry
                .latest(id)
                .ok_or_else(|| QueryError::unknown_schema(id))?],
            None => registry.latest_all(),
        };
        let query = resolve(predicate, &schemas)?;
        let snapshot = snapshot(&self.store, &query)?;
        Ok(ScanPlan::new(
            query,
            snapshot,
            self.store.retry_policy(),
            Arc::clone(&self.metrics),
        ))
    }

    /// Plans and starts streaming in one step
    pub fn read(&self, registry: &SchemaRegistry, predicate: &QueryPredicate) -> QueryResult<RowStream> {
        Ok(self.plan(registry, predicate)?.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{Batch, Value};
    use crate::observability::{MetricsRegistry, NoopMetrics};
    use crate::schema::{FieldDef, FieldType, Schema};
    use crate::store::{Layout, RetryPolicy, StoreOptions};
    use std::time::Duration;
    use tempfile::TempDir;

    const HOUR: i64 = 3_600 * 1_000_000_000;

    fn schema() -> Schema {
        Schema::new(
            "ticks",
            1,
            vec![
                FieldDef::required("ts", FieldType::Timestamp),
                FieldDef::required("symbol", FieldType::String),
                FieldDef::nullable("price", FieldType::Float64),
            ],
            "ts",
        )
    }

    struct Fixture {
        _temp_dir: TempDir,
        registry: SchemaRegistry,
        store: Arc<PartitionStore>,
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = SchemaRegistry::open(temp_dir.path()).unwrap();
        registry.register(schema()).unwrap();

        let layout = Layout {
            format_version: 1,
            bucket_width_secs: 3_600,
        };
        let options = StoreOptions {
            flush_max_rows: 1_000,
            flush_max_age: Duration::from_secs(3_600),
            compression_level: 1,
            retry: RetryPolicy::none(),
        };
        let store =
            PartitionStore::open(temp_dir.path(), layout, options, Arc::new(NoopMetrics)).unwrap();
        Fixture {
            _temp_dir: temp_dir,
            registry,
            store: Arc::new(store),
        }
    }

    fn write(store: &PartitionStore, source: &str, rows: Vec<(i64, &str, f64)>) {
        let schema = Arc::new(schema());
        let rows = rows
            .into_iter()
            .map(|(ts, symbol, price)| {
                vec![
                    Value::Timestamp(ts),
                    Value::String(symbol.into()),
                    Value::Float64(price),
                ]
            })
            .collect();
        let batch = Batch::from_rows(&schema, source, 0, rows);
        store.append(&batch, &schema).unwrap();
        store.flush_all().unwrap();
    }

    fn collect(stream: RowStream) -> Vec<Vec<Value>> {
        stream.flat_map(|b| b.unwrap().rows).collect()
    }

    #[test]
    fn test_projection_and_filter() {
        let f = fixture();
        write(&f.store, "feed", vec![(1, "A", 1.0), (2, "B", 5.0), (3, "A", 9.0)]);
        let engine = QueryEngine::new(Arc::clone(&f.store), Arc::new(NoopMetrics));

        let predicate = QueryPredicate::all()
            .fields(["price", "ts"])
            .filter(Filter::eq("symbol", Value::String("A".into())));
        let rows = collect(engine.read(&f.registry, &predicate).unwrap());
        assert_eq!(
            rows,
            vec![
                vec![Value::Float64(1.0), Value::Timestamp(1)],
                vec![Value::Float64(9.0), Value::Timestamp(3)],
            ]
        );
    }

    #[test]
    fn test_time_range_is_inclusive() {
        let f = fixture();
        write(&f.store, "feed", vec![(10, "A", 1.0), (20, "A", 2.0), (30, "A", 3.0)]);
        let engine = QueryEngine::new(Arc::clone(&f.store), Arc::new(NoopMetrics));

        let rows = collect(engine.read(&f.registry, &QueryPredicate::new(20, 30).fields(["ts"])).unwrap());
        assert_eq!(rows, vec![vec![Value::Timestamp(20)], vec![Value::Timestamp(30)]]);
    }

    #[test]
    fn test_excluded_partition_reads_nothing() {
        let f = fixture();
        write(&f.store, "feed", vec![(5, "A", 1.0)]);
        write(&f.store, "feed", vec![(HOUR * 3, "A", 1.0)]);
        let metrics = Arc::new(MetricsRegistry::new());
        let engine = QueryEngine::new(Arc::clone(&f.store), metrics.clone());

        let plan = engine.plan(&f.registry, &QueryPredicate::new(HOUR * 3, HOUR * 4)).unwrap();
        assert_eq!(plan.stats().partitions_pruned, 1);
        assert_eq!(plan.files().len(), 1);

        let plan = engine.plan(&f.registry, &QueryPredicate::new(HOUR, HOUR * 2)).unwrap();
        let mut stream = plan.iter();
        assert!(stream.next().is_none());
        assert_eq!(stream.bytes_read(), 0);
        assert_eq!(metrics.snapshot().scan_bytes_read, 0);
    }

    #[test]
    fn test_limit_spans_files() {
        let f = fixture();
        write(&f.store, "feed", vec![(1, "A", 1.0), (2, "A", 1.0)]);
        write(&f.store, "feed", vec![(3, "A", 1.0), (4, "A", 1.0)]);
        let engine = QueryEngine::new(Arc::clone(&f.store), Arc::new(NoopMetrics));

        let rows = collect(engine.read(&f.registry, &QueryPredicate::all().limit(3)).unwrap());
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_plan_is_a_snapshot_and_restartable() {
        let f = fixture();
        write(&f.store, "feed", vec![(1, "A", 1.0)]);
        let engine = QueryEngine::new(Arc::clone(&f.store), Arc::new(NoopMetrics));

        let plan = engine.plan(&f.registry, &QueryPredicate::all()).unwrap();
        write(&f.store, "feed", vec![(2, "A", 1.0)]);

        assert_eq!(collect(plan.iter()).len(), 1);
        assert_eq!(collect(plan.iter()).len(), 1);
        assert_eq!(collect(engine.read(&f.registry, &QueryPredicate::all()).unwrap()).len(), 2);
    }

    #[test]
    fn test_rejected_before_reading() {
        let f = fixture();
        write(&f.store, "feed", vec![(1, "A", 1.0)]);
        let metrics = Arc::new(MetricsRegistry::new());
        let engine = QueryEngine::new(Arc::clone(&f.store), metrics.clone());

        let predicate = QueryPredicate::all().filter(Filter::gt("price", Value::Bool(true)));
        let err = engine.plan(&f.registry, &predicate).err().unwrap();
        assert_eq!(err.code(), QueryErrorCode::TickdbQueryTypeMismatch);

        let err = engine
            .plan(&f.registry, &QueryPredicate::all().schema("quotes"))
            .err()
            .unwrap();
        assert_eq!(err.code(), QueryErrorCode::TickdbQueryUnknownSchema);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queries_rejected, 2);
        assert_eq!(snapshot.scan_bytes_read, 0);
    }

    #[test]
    fn test_source_filter() {
        let f = fixture();
        write(&f.store, "a", vec![(1, "A", 1.0)]);
        write(&f.store, "b", vec![(1, "B", 1.0)]);
        write(&f.store, "c", vec![(1, "C", 1.0)]);
        let engine = QueryEngine::new(Arc::clone(&f.store), Arc::new(NoopMetrics));

        let predicate = QueryPredicate::all().sources(["a", "c"]).fields(["source_id"]);
        let rows = collect(engine.read(&f.registry, &predicate).unwrap());
        assert_eq!(
            rows,
            vec![vec![Value::String("a".into())], vec![Value::String("c".into())]]
        );
    }
}
