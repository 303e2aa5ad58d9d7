//! Schema type definitions
//!
//! Supported field types:
//! - int64: 64-bit signed integer
//! - float64: finite 64-bit floating point
//! - string: UTF-8 string
//! - timestamp: nanoseconds since the Unix epoch, UTC
//! - bool: boolean

use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Metadata column stamped on every row by the loader
pub const SOURCE_ID_COLUMN: &str = "source_id";
/// Metadata column stamped on every row by the loader
pub const INGEST_TS_COLUMN: &str = "ingest_ts";

/// Names a schema may not declare because the loader owns them
pub const RESERVED_FIELD_NAMES: [&str; 2] = [SOURCE_ID_COLUMN, INGEST_TS_COLUMN];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int64,
    Float64,
    String,
    Timestamp,
    Bool,
}

impl FieldType {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::Int64 => "int64",
            FieldType::Float64 => "float64",
            FieldType::String => "string",
            FieldType::Timestamp => "timestamp",
            FieldType::Bool => "bool",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Int64 | FieldType::Float64)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Per-field value constraints
///
/// Range bounds apply to numeric fields. Length, pattern and enum apply to
/// string fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        *self == Constraints::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Constraints::is_empty")]
    pub constraints: Constraints,
}

impl FieldDef {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            constraints: Constraints::default(),
        }
    }

    pub fn nullable(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            nullable: true,
            ..Self::required(name, field_type)
        }
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.constraints.min_value = min;
        self.constraints.max_value = max;
        self
    }

    pub fn with_length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.constraints.min_length = min;
        self.constraints.max_length = max;
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.constraints.pattern = Some(pattern.into());
        self
    }

    pub fn with_enum<I, S>(mut self, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constraints.allowed = Some(allowed.into_iter().map(Into::into).collect());
        self
    }
}

/// A published, immutable schema version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub schema_id: String,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<FieldDef>,
    /// Timestamp field used for bucketing and the monotonic rule
    pub time_field: String,
    /// Composite key for duplicate detection; empty disables it
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_fields: Vec<String>,
}

impl Schema {
    pub fn new(
        schema_id: impl Into<String>,
        version: u32,
        fields: Vec<FieldDef>,
        time_field: impl Into<String>,
    ) -> Self {
        Self {
            schema_id: schema_id.into(),
            version,
            description: None,
            fields,
            time_field: time_field.into(),
            key_fields: Vec::new(),
        }
    }

    pub fn with_key<I, S>(mut self, key_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_fields = key_fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn time_field_index(&self) -> Option<usize> {
        self.field_index(&self.time_field)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Type of a declared field or of a metadata column
    pub fn column_type(&self, name: &str) -> Option<FieldType> {
        match name {
            SOURCE_ID_COLUMN => Some(FieldType::String),
            INGEST_TS_COLUMN => Some(FieldType::Timestamp),
            _ => self.field(name).map(|f| f.field_type),
        }
    }

    /// Validates the schema structure itself (not a row)
    pub fn validate_structure(&self) -> Result<(), String> {
        if self.schema_id.is_empty() {
            return Err("schema_id must not be empty".into());
        }
        if !self
            .schema_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!(
                "schema_id '{}' may only contain [A-Za-z0-9_-]",
                self.schema_id
            ));
        }
        if self.fields.is_empty() {
            return Err("schema must declare at least one field".into());
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err("field names must not be empty".into());
            }
            if RESERVED_FIELD_NAMES.contains(&field.name.as_str()) {
                return Err(format!("field name '{}' is reserved", field.name));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(format!("duplicate field name '{}'", field.name));
            }
            validate_constraints(field)?;
        }

        match self.field(&self.time_field) {
            None => return Err(format!("time field '{}' is not declared", self.time_field)),
            Some(f) if f.field_type != FieldType::Timestamp => {
                return Err(format!(
                    "time field '{}' must be timestamp, found {}",
                    f.name, f.field_type
                ))
            }
            Some(f) if f.nullable => {
                return Err(format!("time field '{}' must not be nullable", f.name))
            }
            Some(_) => {}
        }

        let mut key_seen = HashSet::new();
        for key in &self.key_fields {
            if self.field(key).is_none() {
                return Err(format!("key field '{}' is not declared", key));
            }
            if !key_seen.insert(key.as_str()) {
                return Err(format!("key field '{}' listed twice", key));
            }
        }

        Ok(())
    }
}

fn validate_constraints(field: &FieldDef) -> Result<(), String> {
    let c = &field.constraints;

    if (c.min_value.is_some() || c.max_value.is_some()) && !field.field_type.is_numeric() {
        return Err(format!(
            "range constraint on non-numeric field '{}'",
            field.name
        ));
    }
    if let (Some(min), Some(max)) = (c.min_value, c.max_value) {
        if min > max {
            return Err(format!(
                "field '{}': min_value {} exceeds max_value {}",
                field.name, min, max
            ));
        }
    }
    for bound in [c.min_value, c.max_value].into_iter().flatten() {
        if !bound.is_finite() {
            return Err(format!("field '{}': range bounds must be finite", field.name));
        }
    }

    let string_only = c.min_length.is_some()
        || c.max_length.is_some()
        || c.pattern.is_some()
        || c.allowed.is_some();
    if string_only && field.field_type != FieldType::String {
        return Err(format!(
            "length, pattern and enum constraints require a string field, '{}' is {}",
            field.name, field.field_type
        ));
    }
    if let (Some(min), Some(max)) = (c.min_length, c.max_length) {
        if min > max {
            return Err(format!(
                "field '{}': min_length {} exceeds max_length {}",
                field.name, min, max
            ));
        }
    }
    if let Some(ref pattern) = c.pattern {
        Regex::new(pattern)
            .map_err(|e| format!("field '{}': invalid pattern: {}", field.name, e))?;
    }
    if let Some(ref allowed) = c.allowed {
        if allowed.is_empty() {
            return Err(format!("field '{}': enum must list at least one value", field.name));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticks() -> Schema {
        Schema::new(
            "ticks",
            1,
            vec![
                FieldDef::required("ts", FieldType::Timestamp),
                FieldDef::required("symbol", FieldType::String),
                FieldDef::required("price", FieldType::Float64).with_range(Some(0.0), None),
            ],
            "ts",
        )
        .with_key(["ts", "symbol"])
    }

    #[test]
    fn test_valid_schema() {
        assert!(ticks().validate_structure().is_ok());
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(ticks()).unwrap();
        assert_eq!(json["fields"][0]["type"], "timestamp");
        assert_eq!(json["fields"][2]["constraints"]["min_value"], 0.0);
        assert!(json["fields"][1].get("constraints").is_none());

        let back: Schema = serde_json::from_value(json).unwrap();
        assert_eq!(back, ticks());
    }

    #[test]
    fn test_reserved_name_rejected() {
        let mut schema = ticks();
        schema.fields.push(FieldDef::nullable("ingest_ts", FieldType::Timestamp));
        let err = schema.validate_structure().unwrap_err();
        assert!(err.contains("reserved"));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut schema = ticks();
        schema.fields.push(FieldDef::nullable("symbol", FieldType::String));
        assert!(schema.validate_structure().unwrap_err().contains("duplicate"));
    }

    #[test]
    fn test_time_field_rules() {
        let mut schema = ticks();
        schema.time_field = "missing".into();
        assert!(schema.validate_structure().is_err());

        let mut schema = ticks();
        schema.time_field = "symbol".into();
        assert!(schema.validate_structure().unwrap_err().contains("timestamp"));

        let mut schema = ticks();
        schema.fields[0].nullable = true;
        assert!(schema.validate_structure().unwrap_err().contains("nullable"));
    }

    #[test]
    fn test_unknown_key_field_rejected() {
        let schema = ticks().with_key(["ts", "venue"]);
        assert!(schema.validate_structure().unwrap_err().contains("venue"));
    }

    #[test]
    fn test_constraint_rules() {
        let mut schema = ticks();
        schema.fields[2] = FieldDef::required("price", FieldType::Float64)
            .with_range(Some(10.0), Some(1.0));
        assert!(schema.validate_structure().is_err());

        let mut schema = ticks();
        schema.fields[1] = FieldDef::required("symbol", FieldType::String).with_pattern("([");
        assert!(schema.validate_structure().unwrap_err().contains("pattern"));

        let mut schema = ticks();
        schema.fields[2] = FieldDef::required("price", FieldType::Float64).with_enum(["1"]);
        assert!(schema.validate_structure().is_err());
    }

    #[test]
    fn test_column_type_covers_metadata() {
        let schema = ticks();
        assert_eq!(schema.column_type("source_id"), Some(FieldType::String));
        assert_eq!(schema.column_type("ingest_ts"), Some(FieldType::Timestamp));
        assert_eq!(schema.column_type("price"), Some(FieldType::Float64));
        assert_eq!(schema.column_type("nope"), None);
    }
}
