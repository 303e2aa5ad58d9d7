//! Crate-level error facade
//!
//! Each subsystem owns a coded error (`TICKDB_*` code, severity, message).
//! `TickDbError` wraps them for callers of the facade.

use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::loader::LoaderError;
use crate::quarantine::QuarantineError;
use crate::query::QueryError;
use crate::schema::SchemaError;
use crate::store::StoreError;

/// Error severity shared by every subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// The request was refused; nothing changed
    Reject,
    /// The operation failed; committed state is intact
    Error,
    /// State on disk cannot be trusted; the caller must stop
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Reject => "REJECT",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TickDbError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Quarantine(#[from] QuarantineError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("[REJECT] TICKDB_INVALID_SOURCE_ID: {0}")]
    InvalidSourceId(String),

    #[error("[ERROR] TICKDB_IO_ERROR: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl TickDbError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TickDbError::Io {
            context: context.into(),
            source,
        }
    }

    /// The `TICKDB_*` code of the underlying error
    pub fn code(&self) -> &'static str {
        match self {
            TickDbError::Config(e) => e.code().code(),
            TickDbError::Schema(e) => e.code().code(),
            TickDbError::Loader(e) => e.code().code(),
            TickDbError::Store(e) => e.code().code(),
            TickDbError::Quarantine(e) => e.code().code(),
            TickDbError::Query(e) => e.code().code(),
            TickDbError::InvalidSourceId(_) => "TICKDB_INVALID_SOURCE_ID",
            TickDbError::Io { .. } => "TICKDB_IO_ERROR",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            TickDbError::Config(e) => e.severity(),
            TickDbError::Schema(e) => e.severity(),
            TickDbError::Loader(e) => e.severity(),
            TickDbError::Store(e) => e.severity(),
            TickDbError::Quarantine(e) => e.severity(),
            TickDbError::Query(e) => e.severity(),
            TickDbError::InvalidSourceId(_) => Severity::Reject,
            TickDbError::Io { .. } => Severity::Error,
        }
    }
}

pub type TickDbResult<T> = Result<T, TickDbError>;
