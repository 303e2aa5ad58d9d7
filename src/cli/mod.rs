//! Command-line interface for tickdb
//!
//! Provides:
//! - init: create the data root and register the built-in schemas
//! - register, load, read: schema registration, ingestion and queries
//! - quarantine export/replay: inspect and re-validate rejected rows
//! - gc, partitions: orphan cleanup and partition listing

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, QuarantineAction};
pub use commands::{run, run_command};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::write_error;
