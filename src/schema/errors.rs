//! Schema registry errors
//!
//! Error codes:
//! - TICKDB_SCHEMA_NOT_FOUND (REJECT)
//! - TICKDB_SCHEMA_INVALID (REJECT)
//! - TICKDB_SCHEMA_CONFLICT (REJECT)
//! - TICKDB_INVALID_EVOLUTION (REJECT)
//! - TICKDB_SCHEMA_PERSIST_FAILED (ERROR)
//! - TICKDB_SCHEMA_MALFORMED (FATAL)

use std::fmt;
use std::io;

use crate::errors::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorCode {
    /// Schema id or version not registered
    TickdbSchemaNotFound,
    /// Schema structure is invalid
    TickdbSchemaInvalid,
    /// Same id+version already registered with a different definition
    TickdbSchemaConflict,
    /// New version is not an additive, nullable extension of the latest
    TickdbInvalidEvolution,
    /// Writing the schema file failed
    TickdbSchemaPersistFailed,
    /// A persisted schema file cannot be read back
    TickdbSchemaMalformed,
}

impl SchemaErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            SchemaErrorCode::TickdbSchemaNotFound => "TICKDB_SCHEMA_NOT_FOUND",
            SchemaErrorCode::TickdbSchemaInvalid => "TICKDB_SCHEMA_INVALID",
            SchemaErrorCode::TickdbSchemaConflict => "TICKDB_SCHEMA_CONFLICT",
            SchemaErrorCode::TickdbInvalidEvolution => "TICKDB_INVALID_EVOLUTION",
            SchemaErrorCode::TickdbSchemaPersistFailed => "TICKDB_SCHEMA_PERSIST_FAILED",
            SchemaErrorCode::TickdbSchemaMalformed => "TICKDB_SCHEMA_MALFORMED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            SchemaErrorCode::TickdbSchemaPersistFailed => Severity::Error,
            SchemaErrorCode::TickdbSchemaMalformed => Severity::Fatal,
            _ => Severity::Reject,
        }
    }
}

impl fmt::Display for SchemaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug)]
pub struct SchemaError {
    code: SchemaErrorCode,
    message: String,
    schema_id: Option<String>,
    version: Option<u32>,
    source: Option<io::Error>,
}

impl SchemaError {
    fn new(code: SchemaErrorCode, message: String) -> Self {
        Self {
            code,
            message,
            schema_id: None,
            version: None,
            source: None,
        }
    }

    fn for_schema(mut self, schema_id: &str, version: Option<u32>) -> Self {
        self.schema_id = Some(schema_id.to_string());
        self.version = version;
        self
    }

    pub fn not_found(schema_id: &str, version: Option<u32>) -> Self {
        let message = match version {
            Some(v) => format!("Schema '{}' version {} not found", schema_id, v),
            None => format!("Schema '{}' not found", schema_id),
        };
        Self::new(SchemaErrorCode::TickdbSchemaNotFound, message).for_schema(schema_id, version)
    }

    pub fn invalid(schema_id: &str, version: u32, reason: impl Into<String>) -> Self {
        Self::new(
            SchemaErrorCode::TickdbSchemaInvalid,
            format!("Schema '{}' v{} is invalid: {}", schema_id, version, reason.into()),
        )
        .for_schema(schema_id, Some(version))
    }

    pub fn conflict(schema_id: &str, version: u32) -> Self {
        Self::new(
            SchemaErrorCode::TickdbSchemaConflict,
            format!(
                "Schema '{}' v{} is already registered with a different definition",
                schema_id, version
            ),
        )
        .for_schema(schema_id, Some(version))
    }

    pub fn invalid_evolution(schema_id: &str, version: u32, reason: impl Into<String>) -> Self {
        Self::new(
            SchemaErrorCode::TickdbInvalidEvolution,
            format!("Schema '{}' v{}: {}", schema_id, version, reason.into()),
        )
        .for_schema(schema_id, Some(version))
    }

    pub fn persist_failed(schema_id: &str, version: u32, source: io::Error) -> Self {
        let mut err = Self::new(
            SchemaErrorCode::TickdbSchemaPersistFailed,
            format!("Failed to persist schema '{}' v{}", schema_id, version),
        )
        .for_schema(schema_id, Some(version));
        err.source = Some(source);
        err
    }

    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            SchemaErrorCode::TickdbSchemaMalformed,
            format!("Malformed schema file '{}': {}", path.into(), reason.into()),
        )
    }

    pub fn code(&self) -> SchemaErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn schema_id(&self) -> Option<&str> {
        self.schema_id.as_deref()
    }

    pub fn version(&self) -> Option<u32> {
        self.version
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code, self.message)?;
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for SchemaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type SchemaResult<T> = Result<T, SchemaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SchemaErrorCode::TickdbSchemaConflict.code(), "TICKDB_SCHEMA_CONFLICT");
        assert_eq!(SchemaErrorCode::TickdbInvalidEvolution.code(), "TICKDB_INVALID_EVOLUTION");
        assert_eq!(SchemaErrorCode::TickdbSchemaNotFound.code(), "TICKDB_SCHEMA_NOT_FOUND");
    }

    #[test]
    fn test_severity_levels() {
        assert_eq!(SchemaErrorCode::TickdbSchemaConflict.severity(), Severity::Reject);
        assert_eq!(SchemaErrorCode::TickdbSchemaPersistFailed.severity(), Severity::Error);
        assert_eq!(SchemaErrorCode::TickdbSchemaMalformed.severity(), Severity::Fatal);
        assert!(SchemaError::malformed("x.json", "bad").is_fatal());
    }

    #[test]
    fn test_not_found_display() {
        let err = SchemaError::not_found("ticks", Some(3));
        let display = err.to_string();
        assert!(display.contains("REJECT"));
        assert!(display.contains("TICKDB_SCHEMA_NOT_FOUND"));
        assert!(display.contains("version 3"));
        assert_eq!(err.schema_id(), Some("ticks"));
    }
}
