//! CLI-specific error types

use std::fmt;
use std::io;

use crate::errors::TickDbError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// I/O error (stdin/stdout, input files)
    IoError,
    AlreadyInitialized,
    NotInitialized,
    /// Malformed command-line value
    InvalidArgument,
    /// The database refused or failed the operation
    CommandFailed(&'static str),
}

impl CliErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "TICKDB_CLI_CONFIG_ERROR",
            Self::IoError => "TICKDB_CLI_IO_ERROR",
            Self::AlreadyInitialized => "TICKDB_CLI_ALREADY_INITIALIZED",
            Self::NotInitialized => "TICKDB_CLI_NOT_INITIALIZED",
            Self::InvalidArgument => "TICKDB_CLI_INVALID_ARGUMENT",
            Self::CommandFailed(code) => code,
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::InvalidArgument, msg)
    }

    pub fn already_initialized() -> Self {
        Self::new(
            CliErrorCode::AlreadyInitialized,
            "Data directory already initialized",
        )
    }

    pub fn not_initialized() -> Self {
        Self::new(
            CliErrorCode::NotInitialized,
            "Data directory not initialized. Run 'tickdb init' first.",
        )
    }

    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            // The message already carries severity and code
            CliErrorCode::CommandFailed(_) => f.write_str(&self.message),
            _ => write!(f, "{}: {}", self.code.code(), self.message),
        }
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<TickDbError> for CliError {
    fn from(e: TickDbError) -> Self {
        match e {
            TickDbError::Config(ref inner) => Self::config_error(inner.message()),
            other => Self::new(CliErrorCode::CommandFailed(other.code()), other.to_string()),
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;
