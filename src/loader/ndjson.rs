//! Line-delimited JSON decoding

use crate::batch::{Batch, RowProvenance, Value};

use super::decoder::{next_line, BatchDecoder, DecodeContext, Source};
use super::errors::LoaderResult;
use super::format::InputFormat;

pub struct NdjsonDecoder {
    source: Source,
    context: DecodeContext,
    buf: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new(source: Source, context: DecodeContext) -> Self {
        Self {
            source,
            context,
            buf: Vec::new(),
        }
    }
}

impl BatchDecoder for NdjsonDecoder {
    fn decode_batch(&mut self, max_rows: usize) -> LoaderResult<Option<Batch>> {
        let mut batch = Batch::new(
            &self.context.schema,
            &self.context.source_id,
            self.context.ingest_ts,
            InputFormat::Ndjson,
        );
        let declared = self.context.schema.fields.len();

        while batch.len() < max_rows {
            let Some(line) = next_line(self.source.as_mut(), &mut self.buf)? else {
                break;
            };
            match decode_object(&self.context, declared, &line) {
                Ok((values, undeclared)) => {
                    let provenance = RowProvenance {
                        raw: line,
                        undeclared,
                        decode_error: None,
                    };
                    batch.push_row(values, provenance);
                }
                Err(detail) => batch.push_decode_failure(line, detail),
            }
        }

        Ok((!batch.is_empty()).then_some(batch))
    }
}

/// Maps one JSON object onto the declared fields
///
/// Absent fields are null. Keys the schema does not declare are returned
/// separately so the validator can reject the row.
pub fn decode_object(
    context: &DecodeContext,
    declared: usize,
    line: &[u8],
) -> Result<(Vec<Value>, Vec<String>), String> {
    let parsed: serde_json::Value =
        serde_json::from_slice(line).map_err(|e| format!("invalid JSON: {}", e))?;
    let serde_json::Value::Object(object) = parsed else {
        return Err("record is not a JSON object".to_string());
    };

    let mut values = vec![Value::Null; declared];
    let mut undeclared = Vec::new();
    for (key, raw) in &object {
        match context.schema.field_index(key) {
            Some(index) => {
                values[index] =
                    Value::from_json(raw).map_err(|e| format!("field '{}': {}", key, e))?;
            }
            None => undeclared.push(key.clone()),
        }
    }
    Ok((values, undeclared))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldType, Schema};
    use std::io::Cursor;
    use std::sync::Arc;

    fn decoder(input: &str) -> NdjsonDecoder {
        let schema = Schema::new(
            "events",
            1,
            vec![
                FieldDef::required("ts", FieldType::Timestamp),
                FieldDef::nullable("score", FieldType::Float64),
            ],
            "ts",
        );
        let context = DecodeContext {
            schema: Arc::new(schema),
            source_id: "nvd".into(),
            ingest_ts: 5,
        };
        NdjsonDecoder::new(Box::new(Cursor::new(input.as_bytes().to_vec())), context)
    }

    #[test]
    fn test_decodes_objects() {
        let batch = decoder("{\"ts\": 10, \"score\": 0.5}\n{\"ts\": \"2024-01-01T00:00:00Z\"}\n")
            .decode_batch(10)
            .unwrap()
            .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch.declared_row(0),
            vec![&Value::Int64(10), &Value::Float64(0.5)]
        );
        assert_eq!(
            batch.declared_row(1),
            vec![&Value::String("2024-01-01T00:00:00Z".into()), &Value::Null]
        );
        assert_eq!(batch.provenance(0).raw, b"{\"ts\": 10, \"score\": 0.5}");
    }

    #[test]
    fn test_bad_records_become_decode_failures() {
        let input = "not json\n[1,2]\n{\"ts\": {\"nested\": 1}}\n{\"ts\": 1}\n";
        let batch = decoder(input).decode_batch(10).unwrap().unwrap();

        assert_eq!(batch.len(), 4);
        let errors: Vec<_> = (0..4)
            .map(|i| batch.provenance(i).decode_error.clone())
            .collect();
        assert!(errors[0].as_ref().unwrap().starts_with("invalid JSON"));
        assert_eq!(errors[1].as_deref(), Some("record is not a JSON object"));
        assert!(errors[2].as_ref().unwrap().contains("nested"));
        assert!(errors[3].is_none());
    }

    #[test]
    fn test_undeclared_keys_recorded() {
        let batch = decoder("{\"ts\": 1, \"extra\": true}\n")
            .decode_batch(10)
            .unwrap()
            .unwrap();
        assert_eq!(batch.provenance(0).undeclared, vec!["extra".to_string()]);
    }
}
