//! Typed cell values

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::FieldType;

/// A single cell
///
/// Timestamps are nanoseconds since the Unix epoch, UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Null,
    Int64(i64),
    Float64(f64),
    String(String),
    Timestamp(i64),
    Bool(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int64(_) => "int64",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
            Value::Bool(_) => "bool",
        }
    }

    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            Value::Null => None,
            Value::Int64(_) => Some(FieldType::Int64),
            Value::Float64(_) => Some(FieldType::Float64),
            Value::String(_) => Some(FieldType::String),
            Value::Timestamp(_) => Some(FieldType::Timestamp),
            Value::Bool(_) => Some(FieldType::Bool),
        }
    }

    pub fn as_timestamp(&self) -> Option<i64> {
        match self {
            Value::Timestamp(ns) => Some(*ns),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Orders two non-null values of comparable types
    ///
    /// Int64 and Float64 compare numerically with each other. Any other mix,
    /// or a null on either side, is not comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
            (Value::Int64(a), Value::Float64(b)) => (*a as f64).partial_cmp(b),
            (Value::Float64(a), Value::Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// JSON rendering used for raw payloads and CLI output
    ///
    /// Timestamps become integer nanoseconds so that they coerce back
    /// losslessly. Non-finite floats become strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Int64(v) => serde_json::Value::from(*v),
            Value::Float64(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(v.to_string())),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(ns) => serde_json::Value::from(*ns),
            Value::Bool(b) => serde_json::Value::Bool(*b),
        }
    }

    /// Maps a scalar JSON value; arrays and objects are rejected
    pub fn from_json(value: &serde_json::Value) -> Result<Value, String> {
        match value {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int64(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float64(f))
                } else {
                    Err(format!("number {} out of range", n))
                }
            }
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Array(_) => Err("nested array values are not supported".into()),
            serde_json::Value::Object(_) => Err("nested object values are not supported".into()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
            Value::Timestamp(ns) => f.write_str(&format_timestamp(*ns)),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// RFC 3339 with nanosecond precision, `Z` suffix
pub fn format_timestamp(ns: i64) -> String {
    DateTime::<Utc>::from_timestamp_nanos(ns).to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compare_numeric_mix() {
        assert_eq!(Value::Int64(2).compare(&Value::Float64(2.5)), Some(Ordering::Less));
        assert_eq!(Value::Float64(3.0).compare(&Value::Int64(3)), Some(Ordering::Equal));
        assert_eq!(Value::Int64(1).compare(&Value::String("1".into())), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    #[test]
    fn test_from_json_rejects_nesting() {
        assert_eq!(Value::from_json(&json!(5)).unwrap(), Value::Int64(5));
        assert_eq!(Value::from_json(&json!(1.5)).unwrap(), Value::Float64(1.5));
        assert_eq!(Value::from_json(&json!(null)).unwrap(), Value::Null);
        assert!(Value::from_json(&json!([1, 2])).is_err());
        assert!(Value::from_json(&json!({"a": 1})).is_err());
    }

    #[test]
    fn test_to_json_timestamp_is_nanos() {
        assert_eq!(Value::Timestamp(1_700_000_000_000_000_000).to_json(), json!(1_700_000_000_000_000_000i64));
        assert_eq!(Value::Float64(f64::NAN).to_json(), json!("NaN"));
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00.000000000Z");
        assert_eq!(format_timestamp(1_500_000_001), "1970-01-01T00:00:01.500000001Z");
    }
}
