//! Quarantine for rejected rows
//!
//! Rejected rows are never dropped. Each one is kept with its original bytes,
//! the reason it failed and enough context to decode it again, so it can be
//! exported for inspection or replayed against a newer schema without the
//! original source.

mod errors;
mod export;
mod log;
mod marker;
mod record;
mod replay;
mod sink;

pub use errors::{QuarantineError, QuarantineErrorCode, QuarantineResult};
pub use export::{LogEntry, QuarantineEntries, QuarantineExport, QuarantineIter, RecordPosition};
pub use marker::MARKER_EXTENSION;
pub use record::QuarantineRecord;
pub use replay::{rebuild_batch, replay, Replayer, SourceReplay};
pub use sink::{QuarantineSink, LOG_EXTENSION, QUARANTINE_DIR};

use crate::batch::Batch;
use crate::validator::RejectedRow;

/// Builds the records for the rows a validator rejected from `batch`
pub fn records_for(batch: &Batch, rejected: &[RejectedRow]) -> Vec<QuarantineRecord> {
    let column_names = batch.header().map(<[String]>::to_vec).unwrap_or_default();
    rejected
        .iter()
        .map(|row| QuarantineRecord {
            source_id: batch.source_id().to_string(),
            schema_id: batch.schema_id().to_string(),
            schema_version: batch.schema_version(),
            ingest_ts: batch.ingest_ts(),
            reason: row.reason,
            detail: row.detail.clone(),
            input_format: batch.format(),
            column_names: column_names.clone(),
            raw_payload: row.raw.clone(),
        })
        .collect()
}
