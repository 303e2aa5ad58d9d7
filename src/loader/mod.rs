//! Streaming input decoding
//!
//! A load runs in three steps:
//!
//! 1. `detect_format` peeks at the head of the source, after gzip input
//!    has been wrapped in a streaming decompressor
//! 2. `open_decoder` picks the decoder for that format
//! 3. `DecodePipeline` runs the decoder on a worker thread, handing batches
//!    over a bounded channel
//!
//! Malformed records travel inside batches as decode failures. Only a
//! failing or corrupt source is an error.

mod columnar;
mod decoder;
mod delimited;
mod errors;
mod format;
mod ndjson;
mod pipeline;

pub use columnar::ColumnarDecoder;
pub use decoder::{open_decoder, BatchDecoder, DecodeContext, Source};
pub use delimited::{decode_line, parse_record, DelimitedDecoder};
pub use errors::{LoaderError, LoaderErrorCode, LoaderResult};
pub use format::{detect_format, is_gzip, sniff_delimiter, InputFormat, CANDIDATE_DELIMITERS, GZIP_MAGIC};
pub use ndjson::{decode_object, NdjsonDecoder};
pub use pipeline::DecodePipeline;

use std::io::{BufRead, BufReader};
use std::sync::Arc;

use flate2::read::MultiGzDecoder;

use crate::config::TickDbConfig;
use crate::observability::MetricsSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub batch_size: usize,
    pub max_in_flight_batches: usize,
}

impl LoadOptions {
    pub fn from_config(config: &TickDbConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_in_flight_batches: config.max_in_flight_batches,
        }
    }
}

/// Detects the format and starts decoding
///
/// Gzip input is decompressed as it streams and its content detected as
/// usual. Returns `None` for an input with no bytes at all, compressed or
/// not, which loads nothing.
pub fn start_pipeline(
    mut source: Source,
    context: DecodeContext,
    options: LoadOptions,
    metrics: Arc<dyn MetricsSink>,
) -> LoaderResult<Option<(InputFormat, DecodePipeline)>> {
    if source.fill_buf().map_err(LoaderError::source_io)?.is_empty() {
        return Ok(None);
    }
    if is_gzip(&mut source)? {
        source = Box::new(BufReader::new(MultiGzDecoder::new(source)));
        if source.fill_buf().map_err(LoaderError::source_io)?.is_empty() {
            return Ok(None);
        }
    }
    let format = detect_format(&mut source)?;
    let decoder = open_decoder(format, source, context)?;
    let pipeline = DecodePipeline::spawn(
        decoder,
        options.batch_size,
        options.max_in_flight_batches,
        metrics,
    )?;
    Ok(Some((format, pipeline)))
}
