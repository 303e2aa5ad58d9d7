//! Query error types
//!
//! Error codes:
//! - TICKDB_QUERY_INVALID (REJECT)
//! - TICKDB_QUERY_UNKNOWN_FIELD (REJECT)
//! - TICKDB_QUERY_TYPE_MISMATCH (REJECT)
//! - TICKDB_QUERY_UNKNOWN_SCHEMA (REJECT)
//! - TICKDB_QUERY_IO_ERROR (ERROR)
//! - TICKDB_QUERY_CORRUPTION (FATAL)
//!
//! Every REJECT is raised while planning, before any data file is opened.

use std::fmt;
use std::io;
use std::path::Path;

use crate::errors::Severity;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorCode {
    /// Malformed predicate, such as an inverted time range
    TickdbQueryInvalid,
    /// Filter or projection names a field no schema declares
    TickdbQueryUnknownField,
    /// Filter value cannot be compared with the field's type
    TickdbQueryTypeMismatch,
    /// Predicate names an unregistered schema
    TickdbQueryUnknownSchema,
    /// Reading a manifest or data file failed after retries
    TickdbQueryIoError,
    /// A committed file or manifest does not decode
    TickdbQueryCorruption,
}

impl QueryErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            QueryErrorCode::TickdbQueryInvalid => "TICKDB_QUERY_INVALID",
            QueryErrorCode::TickdbQueryUnknownField => "TICKDB_QUERY_UNKNOWN_FIELD",
            QueryErrorCode::TickdbQueryTypeMismatch => "TICKDB_QUERY_TYPE_MISMATCH",
            QueryErrorCode::TickdbQueryUnknownSchema => "TICKDB_QUERY_UNKNOWN_SCHEMA",
            QueryErrorCode::TickdbQueryIoError => "TICKDB_QUERY_IO_ERROR",
            QueryErrorCode::TickdbQueryCorruption => "TICKDB_QUERY_CORRUPTION",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            QueryErrorCode::TickdbQueryInvalid
            | QueryErrorCode::TickdbQueryUnknownField
            | QueryErrorCode::TickdbQueryTypeMismatch
            | QueryErrorCode::TickdbQueryUnknownSchema => Severity::Reject,
            QueryErrorCode::TickdbQueryIoError => Severity::Error,
            QueryErrorCode::TickdbQueryCorruption => Severity::Fatal,
        }
    }
}

impl fmt::Display for QueryErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug)]
pub struct QueryError {
    code: QueryErrorCode,
    message: String,
    /// Field name if applicable
    field: Option<String>,
    source: Option<io::Error>,
}

impl QueryError {
    fn new(code: QueryErrorCode, message: String) -> Self {
        Self {
            code,
            message,
            field: None,
            source: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::new(QueryErrorCode::TickdbQueryInvalid, reason.into())
    }

    pub fn unknown_field(field: &str) -> Self {
        Self {
            field: Some(field.to_string()),
            ..Self::new(
                QueryErrorCode::TickdbQueryUnknownField,
                format!("Field '{}' is not declared by any queried schema", field),
            )
        }
    }

    pub fn type_mismatch(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: Some(field.to_string()),
            ..Self::new(QueryErrorCode::TickdbQueryTypeMismatch, reason.into())
        }
    }

    pub fn unknown_schema(schema_id: &str) -> Self {
        Self::new(
            QueryErrorCode::TickdbQueryUnknownSchema,
            format!("Schema '{}' is not registered", schema_id),
        )
    }

    /// Maps `InvalidData` to corruption and everything else to an I/O error
    pub fn from_read(path: &Path, source: io::Error) -> Self {
        let (code, message) = if source.kind() == io::ErrorKind::InvalidData {
            (
                QueryErrorCode::TickdbQueryCorruption,
                format!("Corrupt data at {}", path.display()),
            )
        } else {
            (
                QueryErrorCode::TickdbQueryIoError,
                format!("Read failed at {}", path.display()),
            )
        };
        Self {
            source: Some(source),
            ..Self::new(code, message)
        }
    }

    /// Listing partitions or manifests failed
    pub fn from_store(err: StoreError) -> Self {
        let code = if err.is_fatal() {
            QueryErrorCode::TickdbQueryCorruption
        } else {
            QueryErrorCode::TickdbQueryIoError
        };
        Self::new(code, err.to_string())
    }

    pub fn code(&self) -> QueryErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    /// Rejected during planning; nothing was read
    pub fn is_rejection(&self) -> bool {
        self.severity() == Severity::Reject
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code, self.message)?;
        if let Some(ref field) = self.field {
            write!(f, " (field: {})", field)?;
        }
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type QueryResult<T> = Result<T, QueryError>;
