//! tickdb - a schema-enforced, partitioned columnar store for feed data
//!
//! Raw rows are decoded, validated against a registered schema, and either
//! committed to compressed column files partitioned by source and time
//! bucket, or quarantined with the reason they failed. Reads prune
//! partitions and files by manifest statistics before touching any data.
//!
//! ```ignore
//! use tickdb::{QueryPredicate, TickDb, TickDbConfig};
//!
//! let db = TickDb::open(TickDbConfig::new("/var/lib/tickdb"))?;
//! db.register_schema(tickdb::schema::ticks_v1())?;
//! let report = db.load_path("nasdaq", "ticks.csv".as_ref(), "ticks_v1")?;
//! for batch in db.read(&QueryPredicate::all().source("nasdaq"))? {
//!     println!("{} rows", batch?.len());
//! }
//! ```

pub mod batch;
pub mod cli;
pub mod config;
pub mod crash_point;
pub mod db;
pub mod durable;
pub mod errors;
pub mod loader;
pub mod observability;
pub mod quarantine;
pub mod query;
pub mod schema;
pub mod store;
pub mod validator;

pub use config::TickDbConfig;
pub use db::{HealthReport, LoadReport, ReplayReport, TickDb};
pub use errors::{Severity, TickDbError, TickDbResult};
pub use query::{Filter, QueryPredicate};
