//! In-memory columnar batches
//!
//! A batch holds up to N rows of one schema version, column-major. The
//! declared fields come first in schema order, followed by the `source_id`
//! and `ingest_ts` metadata columns. Each row also carries its provenance:
//! the original raw bytes, any undeclared field names seen while decoding,
//! and a decode failure if the row could not be decoded at all.

mod value;

pub use value::{format_timestamp, Value};

use crate::loader::InputFormat;
use crate::schema::{Schema, INGEST_TS_COLUMN, SOURCE_ID_COLUMN};

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowProvenance {
    pub raw: Vec<u8>,
    pub undeclared: Vec<String>,
    pub decode_error: Option<String>,
}

impl RowProvenance {
    pub fn new(raw: Vec<u8>) -> Self {
        Self {
            raw,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Batch {
    schema_id: String,
    schema_version: u32,
    source_id: String,
    ingest_ts: i64,
    format: InputFormat,
    header: Option<Vec<String>>,
    declared: usize,
    columns: Vec<Column>,
    provenance: Vec<RowProvenance>,
}

impl Batch {
    pub fn new(schema: &Schema, source_id: &str, ingest_ts: i64, format: InputFormat) -> Self {
        let mut columns: Vec<Column> = schema.field_names().map(Column::empty).collect();
        let declared = columns.len();
        columns.push(Column::empty(SOURCE_ID_COLUMN));
        columns.push(Column::empty(INGEST_TS_COLUMN));

        Self {
            schema_id: schema.schema_id.clone(),
            schema_version: schema.version,
            source_id: source_id.to_string(),
            ingest_ts,
            format,
            header: None,
            declared,
            columns,
            provenance: Vec::new(),
        }
    }

    /// Builds a batch from caller-supplied rows in declared field order
    ///
    /// The raw payload of each row is its JSON object rendering, so rejected
    /// rows stay replayable. A row with the wrong number of values is kept as
    /// a decode failure rather than dropped.
    pub fn from_rows(schema: &Schema, source_id: &str, ingest_ts: i64, rows: Vec<Vec<Value>>) -> Self {
        let mut batch = Self::new(schema, source_id, ingest_ts, InputFormat::Ndjson);
        for values in rows {
            let mut object = serde_json::Map::new();
            for (name, value) in schema.field_names().zip(&values) {
                object.insert(name.to_string(), value.to_json());
            }
            let raw = serde_json::Value::Object(object).to_string().into_bytes();

            if values.len() == batch.declared {
                batch.push_row(values, RowProvenance::new(raw));
            } else {
                let detail = format!(
                    "expected {} values, found {}",
                    batch.declared,
                    values.len()
                );
                batch.push_decode_failure(raw, detail);
            }
        }
        batch
    }

    /// An empty batch with the same schema, source and metadata
    pub fn empty_like(&self) -> Self {
        Self {
            schema_id: self.schema_id.clone(),
            schema_version: self.schema_version,
            source_id: self.source_id.clone(),
            ingest_ts: self.ingest_ts,
            format: self.format,
            header: self.header.clone(),
            declared: self.declared,
            columns: self.columns.iter().map(|c| Column::empty(c.name.clone())).collect(),
            provenance: Vec::new(),
        }
    }

    pub fn with_header(mut self, header: Vec<String>) -> Self {
        self.header = Some(header);
        self
    }

    /// Appends a row of declared values; metadata columns are stamped here
    pub fn push_row(&mut self, values: Vec<Value>, provenance: RowProvenance) {
        debug_assert_eq!(values.len(), self.declared);
        for (column, value) in self.columns.iter_mut().zip(values) {
            column.values.push(value);
        }
        self.columns[self.declared]
            .values
            .push(Value::String(self.source_id.clone()));
        self.columns[self.declared + 1]
            .values
            .push(Value::Timestamp(self.ingest_ts));
        self.provenance.push(provenance);
    }

    /// Appends a row that could not be decoded. Its cells are null.
    pub fn push_decode_failure(&mut self, raw: Vec<u8>, detail: impl Into<String>) {
        let nulls = vec![Value::Null; self.declared];
        self.push_row(
            nulls,
            RowProvenance {
                raw,
                undeclared: Vec::new(),
                decode_error: Some(detail.into()),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.provenance.len()
    }

    pub fn is_empty(&self) -> bool {
        self.provenance.is_empty()
    }

    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn ingest_ts(&self) -> i64 {
        self.ingest_ts
    }

    pub fn format(&self) -> InputFormat {
        self.format
    }

    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    /// Every column, metadata included
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Declared values of one row, in schema order
    pub fn declared_row(&self, row: usize) -> Vec<&Value> {
        self.columns[..self.declared]
            .iter()
            .map(|c| &c.values[row])
            .collect()
    }

    /// All values of one row, metadata included
    pub fn full_row(&self, row: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.values[row].clone()).collect()
    }

    pub fn provenance(&self, row: usize) -> &RowProvenance {
        &self.provenance[row]
    }
}
