//! Delimited text decoding
//!
//! The first non-blank line is the header. Every following non-blank line is
//! one record. Cells are kept as text and coerced later by the validator;
//! an empty cell is a null.

use crate::batch::{Batch, RowProvenance, Value};
use crate::schema::Schema;

use super::decoder::{next_line, BatchDecoder, DecodeContext, Source};
use super::errors::{LoaderError, LoaderResult};
use super::format::InputFormat;

struct Header {
    names: Vec<String>,
    /// Declared field index per header column; `None` if undeclared
    slots: Vec<Option<usize>>,
}

impl Header {
    fn new(schema: &Schema, names: Vec<String>) -> Self {
        let slots = names.iter().map(|name| schema.field_index(name)).collect();
        Self { names, slots }
    }
}

pub struct DelimitedDecoder {
    source: Source,
    delimiter: u8,
    context: DecodeContext,
    header: Option<Header>,
    buf: Vec<u8>,
}

impl DelimitedDecoder {
    pub fn new(source: Source, delimiter: u8, context: DecodeContext) -> Self {
        Self {
            source,
            delimiter,
            context,
            header: None,
            buf: Vec::new(),
        }
    }

    fn read_header(&mut self) -> LoaderResult<bool> {
        let Some(line) = next_line(self.source.as_mut(), &mut self.buf)? else {
            return Ok(false);
        };
        let text = std::str::from_utf8(&line)
            .map_err(|_| LoaderError::unsupported_format("header line is not valid UTF-8"))?;
        let names: Vec<String> = parse_record(text.trim_start_matches('\u{feff}'), self.delimiter)
            .map_err(|e| LoaderError::unsupported_format(format!("unreadable header line: {}", e)))?;

        self.header = Some(Header::new(&self.context.schema, names));
        Ok(true)
    }
}

impl BatchDecoder for DelimitedDecoder {
    fn decode_batch(&mut self, max_rows: usize) -> LoaderResult<Option<Batch>> {
        if self.header.is_none() && !self.read_header()? {
            return Ok(None);
        }
        let Some(header) = self.header.as_ref() else {
            return Ok(None);
        };

        let schema = &self.context.schema;
        let mut batch = Batch::new(
            schema,
            &self.context.source_id,
            self.context.ingest_ts,
            InputFormat::Delimited {
                delimiter: self.delimiter,
            },
        )
        .with_header(header.names.clone());
        let declared = schema.fields.len();

        while batch.len() < max_rows {
            let Some(line) = next_line(self.source.as_mut(), &mut self.buf)? else {
                break;
            };
            decode_row(header, self.delimiter, declared, &mut batch, line);
        }

        Ok((!batch.is_empty()).then_some(batch))
    }
}

fn decode_row(header: &Header, delimiter: u8, declared: usize, batch: &mut Batch, line: Vec<u8>) {
    let cells = match std::str::from_utf8(&line) {
        Ok(text) => parse_record(text, delimiter),
        Err(e) => Err(format!("invalid UTF-8 at byte {}", e.valid_up_to())),
    };
    let cells = match cells {
        Ok(cells) if cells.len() == header.names.len() => cells,
        Ok(cells) => {
            let detail = format!(
                "expected {} fields, found {}",
                header.names.len(),
                cells.len()
            );
            batch.push_decode_failure(line, detail);
            return;
        }
        Err(detail) => {
            batch.push_decode_failure(line, detail);
            return;
        }
    };

    let mut values = vec![Value::Null; declared];
    let mut provenance = RowProvenance::new(Vec::new());
    for ((cell, slot), name) in cells.into_iter().zip(&header.slots).zip(&header.names) {
        if cell.is_empty() {
            continue;
        }
        match slot {
            Some(index) => values[*index] = Value::String(cell),
            None => provenance.undeclared.push(name.clone()),
        }
    }
    provenance.raw = line;
    batch.push_row(values, provenance);
}

/// Decodes one record line against a known header, exactly as the decoder
/// does while streaming
pub fn decode_line(schema: &Schema, header: &[String], delimiter: u8, batch: &mut Batch, line: Vec<u8>) {
    let header = Header::new(schema, header.to_vec());
    decode_row(&header, delimiter, schema.fields.len(), batch, line);
}

/// Splits one line into trimmed cells, honoring quotes
pub fn parse_record(line: &str, delimiter: u8) -> Result<Vec<String>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(line.as_bytes());

    match reader.records().next() {
        Some(Ok(record)) => Ok(record.iter().map(str::to_string).collect()),
        Some(Err(e)) => Err(format!("malformed record: {}", e)),
        None => Ok(Vec::new()),
    }
}
