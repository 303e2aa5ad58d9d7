//! Concurrent write and read tests
//!
//! Appends and flushes racing on one partition key serialize on that key's
//! lock, while distinct keys commit in parallel. Every row lands exactly
//! once and every manifest line names a file that exists. A read planned
//! while flushes commit sees whole commits only.

use std::collections::BTreeSet;
use std::path::Path;
use std::thread;

use tempfile::TempDir;
use tickdb::batch::{Batch, Value};
use tickdb::query::QueryPredicate;
use tickdb::schema::{FieldDef, FieldType, Schema};
use tickdb::store::manifest::read_manifest;
use tickdb::{TickDb, TickDbConfig};

// =============================================================================
// Test Utilities
// =============================================================================

/// 2024-01-02T09:30:00Z
const T0: i64 = 1_704_187_800_000_000_000;
const DAY: i64 = 86_400 * 1_000_000_000;

const THREADS: i64 = 4;
const BATCHES: i64 = 25;
const ROWS: i64 = 4;

fn bars() -> Schema {
    Schema::new(
        "bars",
        1,
        vec![
            FieldDef::required("ts", FieldType::Timestamp),
            FieldDef::required("close", FieldType::Float64),
        ],
        "ts",
    )
    .with_key(["ts"])
}

fn open_db(dir: &TempDir) -> TickDb {
    let mut config = TickDbConfig::new(dir.path());
    config.flush_max_rows = 6;
    config.compression_level = 1;
    let db = TickDb::open(config).unwrap();
    db.register_schema(bars()).unwrap();
    db
}

/// `ROWS` bars numbered from `first`, a microsecond apart after `base`
fn batch(source: &str, base: i64, first: i64) -> Batch {
    let rows = (first..first + ROWS)
        .map(|n| vec![Value::Timestamp(base + n * 1_000), Value::Float64(n as f64)])
        .collect();
    Batch::from_rows(&bars(), source, 0, rows)
}

fn timestamps(db: &TickDb, predicate: QueryPredicate) -> Vec<i64> {
    db.read(&predicate.fields(["ts"]))
        .unwrap()
        .flat_map(|batch| batch.unwrap().rows)
        .filter_map(|row| row[0].as_timestamp())
        .collect()
}

/// Checks every manifest line parses, is unique and names an existing file;
/// returns the rows they commit
fn committed_rows(db: &TickDb, dir: &Path) -> u64 {
    let data_root = dir.join("data");
    let mut rows = 0;
    for partition in db.partitions(None).unwrap() {
        let partition_dir = partition.key.dir(&data_root);
        let entries = read_manifest(&partition_dir).unwrap();
        let names: BTreeSet<&str> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names.len(), entries.len(), "repeated entry in {}", partition_dir.display());
        for entry in &entries {
            assert!(partition_dir.join(&entry.file_name).is_file());
            rows += entry.row_count;
        }
    }
    rows
}

// =============================================================================
// One Partition, Many Writers
// =============================================================================

#[test]
fn test_racing_appends_to_one_partition_store_each_row_once() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_db(&temp_dir);

    thread::scope(|scope| {
        for t in 0..THREADS {
            let db = &db;
            scope.spawn(move || {
                for b in 0..BATCHES {
                    let first = (t * BATCHES + b) * ROWS;
                    let report = db.append(&batch("hot", T0, first), "bars").unwrap();
                    assert_eq!(report.rows_loaded, ROWS as u64);
                    if b % 5 == 0 {
                        db.flush().unwrap();
                    }
                }
            });
        }
    });
    db.flush().unwrap();

    let total = (THREADS * BATCHES * ROWS) as usize;
    let mut seen = timestamps(&db, QueryPredicate::all());
    assert_eq!(seen.len(), total);
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), total);

    assert_eq!(db.partitions(Some("hot")).unwrap().len(), 1);
    assert_eq!(committed_rows(&db, temp_dir.path()), total as u64);
}

// =============================================================================
// Distinct Partitions
// =============================================================================

#[test]
fn test_distinct_partitions_commit_in_parallel() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_db(&temp_dir);

    thread::scope(|scope| {
        for t in 0..THREADS {
            let db = &db;
            scope.spawn(move || {
                let source = format!("src{}", t);
                for b in 0..BATCHES {
                    let base = T0 + (b % 3) * DAY;
                    db.append(&batch(&source, base, b * ROWS), "bars").unwrap();
                }
            });
        }
    });

    let per_source = (BATCHES * ROWS) as usize;
    for t in 0..THREADS {
        let source = format!("src{}", t);
        assert_eq!(timestamps(&db, QueryPredicate::all().source(&source)).len(), per_source);
        assert_eq!(db.partitions(Some(&source)).unwrap().len(), 3);
    }
    assert_eq!(db.partitions(None).unwrap().len(), (THREADS * 3) as usize);
    assert_eq!(committed_rows(&db, temp_dir.path()), (THREADS * BATCHES * ROWS) as u64);
}

// =============================================================================
// Reads During Commits
// =============================================================================

#[test]
fn test_reads_during_flushes_see_whole_commits() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_db(&temp_dir);

    thread::scope(|scope| {
        for t in 0..THREADS {
            let db = &db;
            scope.spawn(move || {
                for b in 0..BATCHES {
                    let first = (t * BATCHES + b) * ROWS;
                    db.append(&batch("live", T0, first), "bars").unwrap();
                }
            });
        }

        let db = &db;
        scope.spawn(move || {
            let mut last = 0;
            for _ in 0..50 {
                let seen = timestamps(db, QueryPredicate::all().source("live"));
                let unique: BTreeSet<i64> = seen.iter().copied().collect();
                assert_eq!(unique.len(), seen.len());
                // Batches are buffered and committed whole
                assert_eq!(seen.len() as i64 % ROWS, 0);
                assert!(seen.len() >= last);
                last = seen.len();
            }
        });
    });

    let total = (THREADS * BATCHES * ROWS) as usize;
    assert_eq!(timestamps(&db, QueryPredicate::all().source("live")).len(), total);
    assert_eq!(committed_rows(&db, temp_dir.path()), total as u64);
}
