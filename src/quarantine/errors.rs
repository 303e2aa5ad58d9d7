//! Quarantine errors
//!
//! Error codes:
//! - TICKDB_QUARANTINE_IO (ERROR)
//! - TICKDB_QUARANTINE_CORRUPTION (FATAL) - checksum mismatch in a committed record

use std::fmt;
use std::io;
use std::path::Path;

use crate::errors::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuarantineErrorCode {
    TickdbQuarantineIo,
    TickdbQuarantineCorruption,
}

impl QuarantineErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            QuarantineErrorCode::TickdbQuarantineIo => "TICKDB_QUARANTINE_IO",
            QuarantineErrorCode::TickdbQuarantineCorruption => "TICKDB_QUARANTINE_CORRUPTION",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            QuarantineErrorCode::TickdbQuarantineIo => Severity::Error,
            QuarantineErrorCode::TickdbQuarantineCorruption => Severity::Fatal,
        }
    }
}

impl fmt::Display for QuarantineErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug)]
pub struct QuarantineError {
    code: QuarantineErrorCode,
    message: String,
    source: Option<io::Error>,
}

impl QuarantineError {
    pub fn io_error(path: &Path, source: io::Error) -> Self {
        Self {
            code: QuarantineErrorCode::TickdbQuarantineIo,
            message: format!("Quarantine I/O failed at {}", path.display()),
            source: Some(source),
        }
    }

    pub fn corruption(path: &Path, detail: impl Into<String>) -> Self {
        Self {
            code: QuarantineErrorCode::TickdbQuarantineCorruption,
            message: format!("Corrupt quarantine log {}: {}", path.display(), detail.into()),
            source: None,
        }
    }

    /// `InvalidData` means a damaged record; anything else is plain I/O
    pub fn from_read(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::InvalidData {
            Self::corruption(path, source.to_string())
        } else {
            Self::io_error(path, source)
        }
    }

    pub fn code(&self) -> QuarantineErrorCode {
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

impl fmt::Display for QuarantineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code, self.message)?;
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for QuarantineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type QuarantineResult<T> = Result<T, QuarantineError>;
