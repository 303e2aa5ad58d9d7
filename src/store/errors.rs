//! Partition store errors
//!
//! Error codes:
//! - TICKDB_STORE_IO_ERROR (ERROR)
//! - TICKDB_STORE_WRITE_FAILED (ERROR) - retries exhausted, partition paused
//! - TICKDB_PARTITION_PAUSED (REJECT)
//! - TICKDB_INVALID_BATCH (REJECT)
//! - TICKDB_DATA_CORRUPTION (FATAL)

use std::fmt;
use std::io;
use std::path::Path;

use crate::errors::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorCode {
    TickdbStoreIoError,
    TickdbStoreWriteFailed,
    TickdbPartitionPaused,
    TickdbInvalidBatch,
    TickdbDataCorruption,
}

impl StoreErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            StoreErrorCode::TickdbStoreIoError => "TICKDB_STORE_IO_ERROR",
            StoreErrorCode::TickdbStoreWriteFailed => "TICKDB_STORE_WRITE_FAILED",
            StoreErrorCode::TickdbPartitionPaused => "TICKDB_PARTITION_PAUSED",
            StoreErrorCode::TickdbInvalidBatch => "TICKDB_INVALID_BATCH",
            StoreErrorCode::TickdbDataCorruption => "TICKDB_DATA_CORRUPTION",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            StoreErrorCode::TickdbStoreIoError => Severity::Error,
            StoreErrorCode::TickdbStoreWriteFailed => Severity::Error,
            StoreErrorCode::TickdbPartitionPaused => Severity::Reject,
            StoreErrorCode::TickdbInvalidBatch => Severity::Reject,
            StoreErrorCode::TickdbDataCorruption => Severity::Fatal,
        }
    }
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug)]
pub struct StoreError {
    code: StoreErrorCode,
    message: String,
    source: Option<io::Error>,
}

impl StoreError {
    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: StoreErrorCode::TickdbStoreIoError,
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn io_error_at_path(path: &Path, source: io::Error) -> Self {
        Self::io_error(format!("I/O error at {}", path.display()), source)
    }

    pub fn write_failed(partition: impl fmt::Display, attempts: u32, source: io::Error) -> Self {
        Self {
            code: StoreErrorCode::TickdbStoreWriteFailed,
            message: format!(
                "Flush of partition {} failed after {} attempts; partition paused",
                partition, attempts
            ),
            source: Some(source),
        }
    }

    pub fn partition_paused(partition: impl fmt::Display) -> Self {
        Self {
            code: StoreErrorCode::TickdbPartitionPaused,
            message: format!(
                "Partition {} is paused after repeated write failures; resume it first",
                partition
            ),
            source: None,
        }
    }

    /// Rows of an append that were refused because their partitions are paused
    pub fn rows_refused<K: fmt::Display>(paused: &[K], rows: usize) -> Self {
        let names: Vec<String> = paused.iter().map(ToString::to_string).collect();
        Self {
            code: StoreErrorCode::TickdbPartitionPaused,
            message: format!(
                "{} rows refused: partitions [{}] are paused after repeated write failures; \
                 resume them first. Rows for other partitions were buffered",
                rows,
                names.join(", ")
            ),
            source: None,
        }
    }

    pub fn invalid_batch(message: impl Into<String>) -> Self {
        Self {
            code: StoreErrorCode::TickdbInvalidBatch,
            message: message.into(),
            source: None,
        }
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self {
            code: StoreErrorCode::TickdbDataCorruption,
            message: message.into(),
            source: None,
        }
    }

    /// Maps `InvalidData` to corruption and everything else to an I/O error
    pub fn from_read(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::InvalidData {
            Self {
                code: StoreErrorCode::TickdbDataCorruption,
                message: format!("Corrupt data at {}: {}", path.display(), source),
                source: Some(source),
            }
        } else {
            Self::io_error_at_path(path, source)
        }
    }

    pub fn code(&self) -> StoreErrorCode {
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

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code, self.message)?;
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_levels() {
        assert_eq!(StoreErrorCode::TickdbStoreIoError.severity(), Severity::Error);
        assert_eq!(StoreErrorCode::TickdbPartitionPaused.severity(), Severity::Reject);
        assert_eq!(StoreErrorCode::TickdbDataCorruption.severity(), Severity::Fatal);
    }

    #[test]
    fn test_from_read_classifies_invalid_data() {
        let path = Path::new("/data/feed/b/part-1.seg");
        let err = StoreError::from_read(path, io::Error::new(io::ErrorKind::InvalidData, "crc"));
        assert!(err.is_fatal());

        let err = StoreError::from_read(path, io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.code(), StoreErrorCode::TickdbStoreIoError);
    }

    #[test]
    fn test_display_includes_cause() {
        let err = StoreError::write_failed("feed/20240101T000000Z", 3, io::Error::other("disk full"));
        let display = err.to_string();
        assert!(display.contains("TICKDB_STORE_WRITE_FAILED"));
        assert!(display.contains("3 attempts"));
        assert!(display.contains("disk full"));
    }
}
