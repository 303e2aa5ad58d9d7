//! Pre-columnar input: a segment file written by this store
//!
//! Values are already typed. The metadata columns in the file are dropped
//! and re-stamped for the new load. The raw payload kept for each row is its
//! JSON object rendering, which replays through the line-delimited JSON path.

use std::io::{Cursor, Read};

use crate::batch::{Batch, RowProvenance, Value};
use crate::schema::RESERVED_FIELD_NAMES;
use crate::store::segment::SegmentReader;

use super::decoder::{BatchDecoder, DecodeContext, Source};
use super::errors::{LoaderError, LoaderResult};
use super::format::InputFormat;

pub struct ColumnarDecoder {
    context: DecodeContext,
    names: Vec<String>,
    columns: Vec<Vec<Value>>,
    /// Declared field index per column; `None` if undeclared
    slots: Vec<Option<usize>>,
    row_count: usize,
    next_row: usize,
}

impl ColumnarDecoder {
    /// Reads the whole segment; the format needs its footer before any row
    pub fn open(mut source: Source, context: DecodeContext) -> LoaderResult<Self> {
        let mut bytes = Vec::new();
        source
            .read_to_end(&mut bytes)
            .map_err(LoaderError::source_io)?;
        let mut reader = SegmentReader::from_reader(Cursor::new(bytes)).map_err(LoaderError::from_io)?;

        let names: Vec<String> = reader
            .column_names()
            .filter(|name| !RESERVED_FIELD_NAMES.contains(name))
            .map(str::to_string)
            .collect();
        let row_count = reader.row_count() as usize;

        let mut columns = Vec::with_capacity(names.len());
        for name in &names {
            let values = reader
                .read_column(name)
                .map_err(LoaderError::from_io)?
                .ok_or_else(|| LoaderError::corrupt_input(format!("column '{}' vanished", name)))?;
            if values.len() != row_count {
                return Err(LoaderError::corrupt_input(format!(
                    "column '{}' holds {} values, footer says {}",
                    name,
                    values.len(),
                    row_count
                )));
            }
            columns.push(values);
        }

        let slots = names.iter().map(|n| context.schema.field_index(n)).collect();
        Ok(Self {
            context,
            names,
            columns,
            slots,
            row_count,
            next_row: 0,
        })
    }
}

impl BatchDecoder for ColumnarDecoder {
    fn decode_batch(&mut self, max_rows: usize) -> LoaderResult<Option<Batch>> {
        if self.next_row >= self.row_count {
            return Ok(None);
        }
        let mut batch = Batch::new(
            &self.context.schema,
            &self.context.source_id,
            self.context.ingest_ts,
            InputFormat::PreColumnar,
        );
        let declared = self.context.schema.fields.len();
        let end = self.row_count.min(self.next_row.saturating_add(max_rows));

        for row in self.next_row..end {
            let mut values = vec![Value::Null; declared];
            let mut provenance = RowProvenance::default();
            let mut object = serde_json::Map::new();

            for ((name, slot), column) in self.names.iter().zip(&self.slots).zip(&self.columns) {
                let value = &column[row];
                object.insert(name.clone(), value.to_json());
                match slot {
                    Some(index) => values[*index] = value.clone(),
                    None if !value.is_null() => provenance.undeclared.push(name.clone()),
                    None => {}
                }
            }

            provenance.raw = serde_json::Value::Object(object).to_string().into_bytes();
            batch.push_row(values, provenance);
        }
        self.next_row = end;

        Ok(Some(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::LoaderErrorCode;
    use crate::schema::{FieldDef, FieldType, Schema};
    use crate::store::segment::write_segment;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context() -> DecodeContext {
        let schema = Schema::new(
            "ticks",
            1,
            vec![
                FieldDef::required("ts", FieldType::Timestamp),
                FieldDef::required("price", FieldType::Float64),
            ],
            "ts",
        );
        DecodeContext {
            schema: Arc::new(schema),
            source_id: "copy".into(),
            ingest_ts: 42,
        }
    }

    fn segment_bytes() -> Vec<u8> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("part.seg");
        let names: Vec<String> = ["ts", "price", "source_id"].iter().map(|s| s.to_string()).collect();
        let columns = vec![
            vec![Value::Timestamp(1), Value::Timestamp(2), Value::Timestamp(3)],
            vec![Value::Float64(1.5), Value::Float64(2.5), Value::Null],
            vec![Value::String("old".into()); 3],
        ];
        write_segment(&path, "ticks", 1, &names, &columns, 1).unwrap();
        std::fs::read(&path).unwrap()
    }

    #[test]
    fn test_decodes_typed_rows_and_restamps_metadata() {
        let source: Source = Box::new(Cursor::new(segment_bytes()));
        let mut dec = ColumnarDecoder::open(source, context()).unwrap();

        let first = dec.decode_batch(2).unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(
            first.declared_row(1),
            vec![&Value::Timestamp(2), &Value::Float64(2.5)]
        );
        assert_eq!(first.column("source_id").unwrap().values[0], Value::String("copy".into()));

        let second = dec.decode_batch(2).unwrap().unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second.provenance(0).raw, br#"{"price":null,"ts":3}"#);
        assert!(dec.decode_batch(2).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_segment_is_fatal() {
        let mut bytes = segment_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let source: Source = Box::new(Cursor::new(bytes));
        let err = ColumnarDecoder::open(source, context()).err().unwrap();
        assert_eq!(err.code(), LoaderErrorCode::TickdbCorruptInput);
        assert!(err.is_fatal());
    }
}
