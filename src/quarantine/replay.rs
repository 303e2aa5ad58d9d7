//! Replay of quarantined rows
//!
//! The raw payload is re-decoded the way the original load would have
//! decoded it, then validated against the given (possibly newer) schema.
//! The original source is never needed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::batch::{Batch, RowProvenance};
use crate::loader::{decode_line, decode_object, DecodeContext, InputFormat};
use crate::schema::{Schema, SchemaResult};
use crate::validator::{ValidationContext, ValidationOutcome, Validator};

use super::errors::QuarantineResult;
use super::export::{LogEntry, RecordPosition};
use super::record::QuarantineRecord;

/// Re-validates quarantined rows, one watermark per source
pub struct Replayer {
    validator: Validator,
    context: ValidationContext,
    ingest_ts: i64,
    watermarks: HashMap<String, Option<i64>>,
}

impl Replayer {
    /// `ingest_ts` stamps every replayed row; watermarks start fresh
    pub fn new(schema: Arc<Schema>, context: ValidationContext, ingest_ts: i64) -> SchemaResult<Self> {
        Ok(Self {
            validator: Validator::new(schema)?,
            context: ValidationContext {
                watermark: None,
                ..context
            },
            ingest_ts,
            watermarks: HashMap::new(),
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.validator.schema()
    }

    /// Rebuilds one batch from records of a single source and validates it
    pub fn replay_batch(&mut self, source_id: &str, records: &[QuarantineRecord]) -> ValidationOutcome {
        let batch = rebuild_batch(self.validator.schema(), source_id, self.ingest_ts, records);
        let watermark = self.watermarks.get(source_id).copied().flatten();
        let context = ValidationContext {
            watermark,
            ..self.context
        };

        let outcome = self.validator.validate(&batch, &context);
        self.watermarks.insert(source_id.to_string(), outcome.watermark);
        outcome
    }
}

/// Decodes raw payloads into a fresh batch for `schema`
///
/// Delimited rows are split with the header and delimiter recorded beside
/// them. Everything else is a JSON object.
pub fn rebuild_batch(
    schema: &Arc<Schema>,
    source_id: &str,
    ingest_ts: i64,
    records: &[QuarantineRecord],
) -> Batch {
    let context = DecodeContext {
        schema: Arc::clone(schema),
        source_id: source_id.to_string(),
        ingest_ts,
    };
    let declared = schema.fields.len();
    let mut batch = Batch::new(schema, source_id, ingest_ts, InputFormat::Ndjson);

    for record in records {
        let raw = record.raw_payload.clone();
        match record.input_format {
            InputFormat::Delimited { delimiter } => {
                decode_line(schema, &record.column_names, delimiter, &mut batch, raw);
            }
            InputFormat::Ndjson | InputFormat::PreColumnar => {
                match decode_object(&context, declared, &raw) {
                    Ok((values, undeclared)) => {
                        let mut provenance = RowProvenance::new(raw);
                        provenance.undeclared = undeclared;
                        batch.push_row(values, provenance);
                    }
                    Err(detail) => batch.push_decode_failure(raw, detail),
                }
            }
        }
    }
    batch
}

/// What replaying one source's records produced
#[derive(Debug, Clone)]
pub struct SourceReplay {
    pub source_id: String,
    pub outcome: ValidationOutcome,
    /// Position of the record behind each row of the rebuilt batch
    pub positions: Vec<RecordPosition>,
}

impl SourceReplay {
    /// Positions of the records whose rows now pass
    pub fn accepted_positions(&self) -> Vec<RecordPosition> {
        let rejected: HashSet<usize> = self.outcome.rejected.iter().map(|r| r.row).collect();
        self.positions
            .iter()
            .enumerate()
            .filter(|(row, _)| !rejected.contains(row))
            .map(|(_, position)| position.clone())
            .collect()
    }
}

/// Replays a sequence of log entries through `replayer`
///
/// Entries are grouped by source; each source yields one batch, one row per
/// record, in log order.
pub fn replay<I>(entries: I, replayer: &mut Replayer) -> QuarantineResult<Vec<SourceReplay>>
where
    I: IntoIterator<Item = QuarantineResult<LogEntry>>,
{
    let mut by_source: BTreeMap<String, (Vec<QuarantineRecord>, Vec<RecordPosition>)> =
        BTreeMap::new();
    for entry in entries {
        let LogEntry { position, record } = entry?;
        let (records, positions) = by_source.entry(record.source_id.clone()).or_default();
        records.push(record);
        positions.push(position);
    }

    Ok(by_source
        .into_iter()
        .map(|(source_id, (records, positions))| {
            let outcome = replayer.replay_batch(&source_id, &records);
            SourceReplay {
                source_id,
                outcome,
                positions,
            }
        })
        .collect())
}
