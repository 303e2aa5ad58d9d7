//! Loader errors
//!
//! Error codes:
//! - TICKDB_UNSUPPORTED_FORMAT (REJECT)
//! - TICKDB_SOURCE_IO (ERROR)
//! - TICKDB_DECODE_WORKER_FAILED (ERROR)
//! - TICKDB_CORRUPT_INPUT (FATAL)
//!
//! Malformed records are not errors here. They travel inside the batch as
//! decode failures and end up in quarantine.

use std::fmt;
use std::io;

use crate::errors::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderErrorCode {
    TickdbUnsupportedFormat,
    TickdbSourceIo,
    TickdbDecodeWorkerFailed,
    TickdbCorruptInput,
}

impl LoaderErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            LoaderErrorCode::TickdbUnsupportedFormat => "TICKDB_UNSUPPORTED_FORMAT",
            LoaderErrorCode::TickdbSourceIo => "TICKDB_SOURCE_IO",
            LoaderErrorCode::TickdbDecodeWorkerFailed => "TICKDB_DECODE_WORKER_FAILED",
            LoaderErrorCode::TickdbCorruptInput => "TICKDB_CORRUPT_INPUT",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            LoaderErrorCode::TickdbUnsupportedFormat => Severity::Reject,
            LoaderErrorCode::TickdbSourceIo => Severity::Error,
            LoaderErrorCode::TickdbDecodeWorkerFailed => Severity::Error,
            LoaderErrorCode::TickdbCorruptInput => Severity::Fatal,
        }
    }
}

impl fmt::Display for LoaderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug)]
pub struct LoaderError {
    code: LoaderErrorCode,
    message: String,
    source: Option<io::Error>,
}

impl LoaderError {
    pub fn unsupported_format(reason: impl Into<String>) -> Self {
        Self {
            code: LoaderErrorCode::TickdbUnsupportedFormat,
            message: format!("Unsupported input format: {}", reason.into()),
            source: None,
        }
    }

    pub fn source_io(source: io::Error) -> Self {
        Self {
            code: LoaderErrorCode::TickdbSourceIo,
            message: "Failed to read input source".to_string(),
            source: Some(source),
        }
    }

    pub fn worker_failed(reason: impl Into<String>) -> Self {
        Self {
            code: LoaderErrorCode::TickdbDecodeWorkerFailed,
            message: format!("Decode worker failed: {}", reason.into()),
            source: None,
        }
    }

    pub fn corrupt_input(reason: impl Into<String>) -> Self {
        Self {
            code: LoaderErrorCode::TickdbCorruptInput,
            message: format!("Corrupt input: {}", reason.into()),
            source: None,
        }
    }

    /// Source read failure; `InvalidData` from a segment reader means corruption
    pub fn from_io(source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::InvalidData {
            Self {
                code: LoaderErrorCode::TickdbCorruptInput,
                message: format!("Corrupt input: {}", source),
                source: Some(source),
            }
        } else {
            Self::source_io(source)
        }
    }

    pub fn code(&self) -> LoaderErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code, self.message)?;
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for LoaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type LoaderResult<T> = Result<T, LoaderError>;
