//! CLI argument definitions using clap
//!
//! Commands:
//! - tickdb init --config <path>
//! - tickdb register --config <path> --schema <file>
//! - tickdb load --config <path> --source <id> --schema <id> [--input <file>]
//! - tickdb read --config <path> [--source <id>]... [--start <ts>] [--end <ts>] ...
//! - tickdb quarantine export|replay --config <path> ...
//! - tickdb gc --config <path>
//! - tickdb partitions --config <path> [--source <id>]
//! - tickdb schemas --config <path>
//! - tickdb health --config <path>
//! - tickdb metrics --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tickdb - schema-enforced, partitioned columnar storage for feed data
#[derive(Parser, Debug)]
#[command(name = "tickdb")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the data root and register the built-in schemas
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./tickdb.json")]
        config: PathBuf,
    },

    /// Register a schema from a JSON file
    Register {
        #[arg(long, default_value = "./tickdb.json")]
        config: PathBuf,

        /// Schema definition (JSON)
        #[arg(long)]
        schema: PathBuf,
    },

    /// Load a delimited, NDJSON or segment file
    Load {
        #[arg(long, default_value = "./tickdb.json")]
        config: PathBuf,

        /// Source id the rows are stored under
        #[arg(long)]
        source: String,

        /// Schema id; its latest version is used
        #[arg(long)]
        schema: String,

        /// Input file; stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Stream matching rows as NDJSON
    Read {
        #[arg(long, default_value = "./tickdb.json")]
        config: PathBuf,

        /// Restrict to these sources (repeatable)
        #[arg(long = "source")]
        sources: Vec<String>,

        #[arg(long)]
        schema: Option<String>,

        /// Inclusive start: RFC 3339, date, or integer nanoseconds
        #[arg(long)]
        start: Option<String>,

        /// Inclusive end: RFC 3339, date, or integer nanoseconds
        #[arg(long)]
        end: Option<String>,

        /// Comma-separated projection; all stored columns when omitted
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,

        /// `field<op>value` with op one of = > >= < <= (repeatable).
        /// The value is read as JSON, falling back to a plain string.
        #[arg(long = "filter")]
        filters: Vec<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Inspect or replay quarantined rows
    Quarantine {
        #[command(subcommand)]
        action: QuarantineAction,
    },

    /// Remove data files that no manifest references
    Gc {
        #[arg(long, default_value = "./tickdb.json")]
        config: PathBuf,
    },

    /// List partitions with their file, row and byte totals
    Partitions {
        #[arg(long, default_value = "./tickdb.json")]
        config: PathBuf,

        #[arg(long)]
        source: Option<String>,
    },

    /// List registered schema versions
    Schemas {
        #[arg(long, default_value = "./tickdb.json")]
        config: PathBuf,
    },

    /// Report data root presence, schema count and paused partitions
    Health {
        #[arg(long, default_value = "./tickdb.json")]
        config: PathBuf,
    },

    /// Report stored and quarantined totals
    Metrics {
        #[arg(long, default_value = "./tickdb.json")]
        config: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum QuarantineAction {
    /// Print quarantined records as NDJSON
    Export {
        #[arg(long, default_value = "./tickdb.json")]
        config: PathBuf,

        #[arg(long)]
        source: Option<String>,

        /// DecodeError or ValidationError
        #[arg(long)]
        reason: Option<String>,
    },

    /// Re-validate quarantined rows against the latest schema version
    Replay {
        #[arg(long, default_value = "./tickdb.json")]
        config: PathBuf,

        #[arg(long)]
        schema: String,

        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        reason: Option<String>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
