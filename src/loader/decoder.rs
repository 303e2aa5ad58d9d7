//! Batch decoding: one decoder per input format

use std::io::BufRead;
use std::sync::Arc;

use crate::batch::Batch;
use crate::schema::Schema;

use super::columnar::ColumnarDecoder;
use super::delimited::DelimitedDecoder;
use super::errors::{LoaderError, LoaderResult};
use super::format::InputFormat;
use super::ndjson::NdjsonDecoder;

/// The input side of a load
pub type Source = Box<dyn BufRead + Send>;

/// Produces batches of at most `max_rows` rows until the input runs out
///
/// Malformed records come back inside the batch as decode failures. An
/// `Err` means the source itself is unusable.
pub trait BatchDecoder: Send {
    fn decode_batch(&mut self, max_rows: usize) -> LoaderResult<Option<Batch>>;
}

/// Everything a decoder stamps onto the batches it produces
#[derive(Debug, Clone)]
pub struct DecodeContext {
    pub schema: Arc<Schema>,
    pub source_id: String,
    pub ingest_ts: i64,
}

pub fn open_decoder(
    format: InputFormat,
    source: Source,
    context: DecodeContext,
) -> LoaderResult<Box<dyn BatchDecoder>> {
    Ok(match format {
        InputFormat::Delimited { delimiter } => {
            Box::new(DelimitedDecoder::new(source, delimiter, context))
        }
        InputFormat::Ndjson => Box::new(NdjsonDecoder::new(source, context)),
        InputFormat::PreColumnar => Box::new(ColumnarDecoder::open(source, context)?),
    })
}

/// Reads the next non-blank line with its terminator stripped
///
/// Returns `None` at end of input. The bytes are returned as read, valid
/// UTF-8 or not.
pub(super) fn next_line(source: &mut dyn BufRead, buf: &mut Vec<u8>) -> LoaderResult<Option<Vec<u8>>> {
    loop {
        buf.clear();
        let n = source.read_until(b'\n', buf).map_err(LoaderError::source_io)?;
        if n == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        if buf.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        return Ok(Some(buf.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_next_line_skips_blank_and_strips_crlf() {
        let mut source = Cursor::new(b"a,b\r\n\n   \nc,d".to_vec());
        let mut buf = Vec::new();
        assert_eq!(next_line(&mut source, &mut buf).unwrap(), Some(b"a,b".to_vec()));
        assert_eq!(next_line(&mut source, &mut buf).unwrap(), Some(b"c,d".to_vec()));
        assert_eq!(next_line(&mut source, &mut buf).unwrap(), None);
    }
}
