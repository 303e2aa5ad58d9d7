//! Schema registry
//!
//! Schemas are versioned and immutable once published. Every row written to
//! the store belongs to exactly one registered schema version, and evolution
//! across versions of an id is additive and nullable-only.

mod builtin;
mod errors;
mod registry;
mod types;

pub use builtin::{alt_nvd_v1, builtin_schemas, ticks_v1, ALT_NVD_V1, TICKS_V1};
pub use errors::{SchemaError, SchemaErrorCode, SchemaResult};
pub use registry::{Registration, SchemaRegistry};
pub use types::{
    Constraints, FieldDef, FieldType, Schema, INGEST_TS_COLUMN, RESERVED_FIELD_NAMES,
    SOURCE_ID_COLUMN,
};
