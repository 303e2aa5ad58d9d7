//! Explicit coercion of decoded values to declared field types
//!
//! Text coerces to every type. Typed values coerce only along lossless
//! paths: int64 to float64, int64 to timestamp (nanoseconds) and the
//! integers 0/1 to bool. Nothing coerces to string except a string.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::batch::Value;
use crate::schema::FieldType;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Converts `value` to `target`, or explains why not. Null passes through.
pub fn coerce(value: &Value, target: FieldType) -> Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let coerced = match (target, value) {
        (FieldType::Int64, Value::Int64(v)) => Some(Value::Int64(*v)),
        (FieldType::Int64, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::Int64),

        (FieldType::Float64, Value::Float64(v)) => Some(Value::Float64(*v)),
        (FieldType::Float64, Value::Int64(v)) => Some(Value::Float64(*v as f64)),
        (FieldType::Float64, Value::String(s)) => s.trim().parse::<f64>().ok().map(Value::Float64),

        (FieldType::Timestamp, Value::Timestamp(ns)) => Some(Value::Timestamp(*ns)),
        (FieldType::Timestamp, Value::Int64(ns)) => Some(Value::Timestamp(*ns)),
        (FieldType::Timestamp, Value::String(s)) => parse_timestamp(s).map(Value::Timestamp),

        (FieldType::Bool, Value::Bool(b)) => Some(Value::Bool(*b)),
        (FieldType::Bool, Value::Int64(0)) => Some(Value::Bool(false)),
        (FieldType::Bool, Value::Int64(1)) => Some(Value::Bool(true)),
        (FieldType::Bool, Value::String(s)) => parse_bool(s).map(Value::Bool),

        (FieldType::String, Value::String(s)) => Some(Value::String(s.clone())),
        _ => None,
    };

    match coerced {
        Some(Value::Float64(v)) if !v.is_finite() => {
            Err(format!("{} is not a finite float64", v))
        }
        Some(v) => Ok(v),
        None => Err(format!(
            "cannot coerce {} {} to {}",
            value.type_name(),
            quoted(value),
            target.type_name()
        )),
    }
}

/// Parses a timestamp given as integer nanoseconds, RFC 3339, or a naive
/// date/time taken as UTC
pub fn parse_timestamp(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(ns) = text.parse::<i64>() {
        return Some(ns);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return dt.timestamp_nanos_opt();
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return naive.and_utc().timestamp_nanos_opt();
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .and_then(|naive| naive.and_utc().timestamp_nanos_opt())
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim() {
        "true" | "True" | "TRUE" | "1" => Some(true),
        "false" | "False" | "FALSE" | "0" => Some(false),
        _ => None,
    }
}

fn quoted(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", s),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_coerces_to_numbers() {
        assert_eq!(
            coerce(&Value::String(" 42 ".into()), FieldType::Int64).unwrap(),
            Value::Int64(42)
        );
        assert_eq!(
            coerce(&Value::String("1.25".into()), FieldType::Float64).unwrap(),
            Value::Float64(1.25)
        );
        assert_eq!(coerce(&Value::Int64(3), FieldType::Float64).unwrap(), Value::Float64(3.0));
    }

    #[test]
    fn test_uncoercible_text_explained() {
        let err = coerce(&Value::String("abc".into()), FieldType::Float64).unwrap_err();
        assert_eq!(err, r#"cannot coerce string "abc" to float64"#);

        let err = coerce(&Value::String("NaN".into()), FieldType::Float64).unwrap_err();
        assert!(err.contains("finite"));

        assert!(coerce(&Value::Float64(1.5), FieldType::Int64).is_err());
        assert!(coerce(&Value::Int64(1), FieldType::String).is_err());
    }

    #[test]
    fn test_timestamp_forms() {
        let expected = 1_704_067_200_000_000_000i64; // 2024-01-01T00:00:00Z
        for text in [
            "1704067200000000000",
            "2024-01-01T00:00:00Z",
            "2024-01-01T01:00:00+01:00",
            "2024-01-01 00:00:00",
            "2024-01-01T00:00:00.000",
            "2024-01-01",
        ] {
            assert_eq!(parse_timestamp(text), Some(expected), "{}", text);
        }
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(
            coerce(&Value::Int64(expected), FieldType::Timestamp).unwrap(),
            Value::Timestamp(expected)
        );
    }

    #[test]
    fn test_bool_forms() {
        assert_eq!(coerce(&Value::String("TRUE".into()), FieldType::Bool).unwrap(), Value::Bool(true));
        assert_eq!(coerce(&Value::Int64(0), FieldType::Bool).unwrap(), Value::Bool(false));
        assert!(coerce(&Value::Int64(2), FieldType::Bool).is_err());
        assert!(coerce(&Value::String("yes".into()), FieldType::Bool).is_err());
    }

    #[test]
    fn test_null_passes_through() {
        assert_eq!(coerce(&Value::Null, FieldType::Int64).unwrap(), Value::Null);
    }
}
