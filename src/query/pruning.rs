//! Partition and file pruning
//!
//! Buckets are pruned by name alone, so a partition outside the time range
//! is never opened. Manifests of the remaining partitions are read once, when
//! the plan is made, and each entry is checked against the time range, the
//! schema filter and the per-column statistics.

use std::path::PathBuf;

use crate::batch::Value;
use crate::store::{read_manifest, ColumnStats, ManifestEntry, PartitionKey, PartitionStore, StoreError};

use super::errors::{QueryError, QueryResult};
use super::predicate::{FilterOp, ResolvedQuery};

/// A committed data file the scan will open
#[derive(Debug, Clone, PartialEq)]
pub struct ScanFile {
    pub key: PartitionKey,
    pub path: PathBuf,
    pub entry: ManifestEntry,
}

impl ScanFile {
    /// Every row is inside the time range, so the time column need not be read
    pub fn within(&self, time_start: i64, time_end: i64) -> bool {
        self.entry.min_ts >= time_start && self.entry.max_ts <= time_end
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub files: Vec<ScanFile>,
    pub partitions_scanned: u64,
    pub partitions_pruned: u64,
    pub files_pruned: u64,
}

/// Captures the committed files that may hold matching rows
pub fn snapshot(store: &PartitionStore, query: &ResolvedQuery) -> QueryResult<Snapshot> {
    let layout = store.layout();
    let sources = match &query.sources {
        Some(ids) => ids.iter().cloned().collect(),
        None => store.sources().map_err(QueryError::from_store)?,
    };

    let mut snapshot = Snapshot::default();
    for source in sources {
        for bucket_start in store.buckets(&source).map_err(QueryError::from_store)? {
            if !layout.bucket_intersects(bucket_start, query.time_start, query.time_end) {
                snapshot.partitions_pruned += 1;
                continue;
            }
            snapshot.partitions_scanned += 1;

            let key = PartitionKey::new(source.clone(), bucket_start);
            let dir = key.dir(store.data_root());
            let entries = read_manifest(&dir)
                .map_err(|e| QueryError::from_store(StoreError::from_read(&dir, e)))?;

            for entry in entries {
                if !may_match(&entry, query) {
                    snapshot.files_pruned += 1;
                    continue;
                }
                snapshot.files.push(ScanFile {
                    key: key.clone(),
                    path: dir.join(&entry.file_name),
                    entry,
                });
            }
        }
    }
    Ok(snapshot)
}

/// False only when the entry provably holds no matching row
pub fn may_match(entry: &ManifestEntry, query: &ResolvedQuery) -> bool {
    if let Some(ref schema_id) = query.schema_id {
        if entry.schema_id != *schema_id {
            return false;
        }
    }
    if entry.row_count == 0 || entry.max_ts < query.time_start || entry.min_ts > query.time_end {
        return false;
    }
    query.filters.iter().all(|filter| match entry.columns.get(&filter.field) {
        Some(stats) => stats_may_match(stats, &filter.op),
        // The column is absent, so every value is null
        None => false,
    })
}

fn stats_may_match(stats: &ColumnStats, op: &FilterOp) -> bool {
    let (Some(min), Some(max)) = (&stats.min, &stats.max) else {
        return false;
    };
    let bound = op.bound();
    match op {
        FilterOp::Eq(_) => !greater(min, bound) && !greater(bound, max),
        FilterOp::Gt(_) => greater(max, bound),
        FilterOp::Gte(_) => !greater(bound, max),
        FilterOp::Lt(_) => greater(bound, min),
        FilterOp::Lte(_) => !greater(min, bound),
    }
}

/// `a > b`; incomparable pairs keep the file
fn greater(a: &Value, b: &Value) -> bool {
    match a.compare(b) {
        Some(ordering) => ordering == std::cmp::Ordering::Greater,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::predicate::Filter;
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet};

    fn entry(min_price: f64, max_price: f64) -> ManifestEntry {
        let mut columns = BTreeMap::new();
        columns.insert(
            "price".to_string(),
            ColumnStats {
                min: Some(Value::Float64(min_price)),
                max: Some(Value::Float64(max_price)),
                null_count: 0,
            },
        );
        columns.insert(
            "venue".to_string(),
            ColumnStats {
                min: None,
                max: None,
                null_count: 4,
            },
        );
        ManifestEntry {
            file_name: "part-a.seg".into(),
            schema_id: "ticks".into(),
            schema_version: 1,
            time_field: "ts".into(),
            row_count: 4,
            byte_size: 100,
            min_ts: 100,
            max_ts: 200,
            columns,
            committed_at: Utc::now(),
        }
    }

    fn query(filters: Vec<Filter>) -> ResolvedQuery {
        ResolvedQuery {
            sources: None,
            schema_id: None,
            time_start: i64::MIN,
            time_end: i64::MAX,
            filters,
            fields: Vec::new(),
            limit: None,
        }
    }

    #[test]
    fn test_time_range_prunes() {
        let mut q = query(Vec::new());
        assert!(may_match(&entry(1.0, 2.0), &q));
        q.time_start = 201;
        assert!(!may_match(&entry(1.0, 2.0), &q));
        q.time_start = 200;
        assert!(may_match(&entry(1.0, 2.0), &q));
    }

    #[test]
    fn test_stats_prune_ranges() {
        let e = entry(10.0, 20.0);
        let keep = |f: Filter| may_match(&e, &query(vec![f]));

        assert!(keep(Filter::eq("price", Value::Float64(15.0))));
        assert!(!keep(Filter::eq("price", Value::Float64(25.0))));
        assert!(!keep(Filter::gt("price", Value::Float64(20.0))));
        assert!(keep(Filter::gte("price", Value::Float64(20.0))));
        assert!(!keep(Filter::lt("price", Value::Float64(10.0))));
        assert!(keep(Filter::lte("price", Value::Float64(10.0))));
    }

    #[test]
    fn test_all_null_or_missing_column_prunes() {
        let e = entry(10.0, 20.0);
        assert!(!may_match(&e, &query(vec![Filter::eq("venue", Value::String("X".into()))])));
        assert!(!may_match(&e, &query(vec![Filter::eq("side", Value::String("buy".into()))])));
    }

    #[test]
    fn test_schema_filter_prunes() {
        let mut q = query(Vec::new());
        q.schema_id = Some("quotes".into());
        assert!(!may_match(&entry(1.0, 2.0), &q));
        q.schema_id = Some("ticks".into());
        assert!(may_match(&entry(1.0, 2.0), &q));
        q.sources = Some(BTreeSet::new());
        assert!(!q.wants_source("feed"));
    }
}
