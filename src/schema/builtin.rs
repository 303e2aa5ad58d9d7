//! Schemas shipped with tickdb
//!
//! Registering them is explicit (`tickdb init` does it); opening a data root
//! never writes schema files on its own.

use super::types::{FieldDef, FieldType, Schema};

pub const TICKS_V1: &str = "ticks_v1";
pub const ALT_NVD_V1: &str = "alt_nvd_v1";

/// Trade prints: one row per execution
pub fn ticks_v1() -> Schema {
    Schema::new(
        TICKS_V1,
        1,
        vec![
            FieldDef::required("ts", FieldType::Timestamp),
            FieldDef::required("symbol", FieldType::String).with_length(Some(1), None),
            FieldDef::required("price", FieldType::Float64).with_range(Some(0.0), None),
            FieldDef::required("size", FieldType::Int64).with_range(Some(0.0), None),
            FieldDef::nullable("side", FieldType::String).with_enum(["buy", "sell"]),
            FieldDef::nullable("exchange", FieldType::String),
        ],
        "ts",
    )
    .with_key(["ts", "symbol"])
    .with_description("Standard tick data schema")
}

/// News and sentiment events keyed to a symbol
pub fn alt_nvd_v1() -> Schema {
    Schema::new(
        ALT_NVD_V1,
        1,
        vec![
            FieldDef::required("ts", FieldType::Timestamp),
            FieldDef::required("symbol", FieldType::String).with_length(Some(1), None),
            FieldDef::required("event_type", FieldType::String),
            FieldDef::nullable("content", FieldType::String),
            FieldDef::nullable("score", FieldType::Float64).with_range(Some(-1.0), Some(1.0)),
            FieldDef::nullable("source", FieldType::String),
        ],
        "ts",
    )
    .with_description("Alternative data schema for news and sentiment")
}

pub fn builtin_schemas() -> Vec<Schema> {
    vec![ticks_v1(), alt_nvd_v1()]
}
