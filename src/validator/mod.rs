//! Row-granular validation
//!
//! Validation is pure: it reads a decoded batch and returns the accepted
//! rows, with values coerced to declared types, plus one rejection per
//! failed row. Checks run per row in this order, first failure wins:
//!
//! 1. decode failure carried from the loader
//! 2. undeclared fields
//! 3. coercion to the declared type
//! 4. nullability
//! 5. range, length, pattern and enum constraints
//! 6. monotonic time against the session watermark
//! 7. maximum future skew against the batch ingest time
//! 8. duplicate declared key within the batch (first occurrence wins)

mod coerce;

pub use coerce::{coerce, parse_timestamp};

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::batch::{Batch, RowProvenance, Value};
use crate::config::TickDbConfig;
use crate::schema::{FieldDef, Schema, SchemaError, SchemaResult};

/// Why a row was quarantined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReasonCode {
    DecodeError,
    ValidationError,
}

impl ReasonCode {
    pub const ALL: [ReasonCode; 2] = [ReasonCode::DecodeError, ReasonCode::ValidationError];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::DecodeError => "DecodeError",
            ReasonCode::ValidationError => "ValidationError",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasonCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReasonCode::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown reason code '{}'", s))
    }
}

/// Session state and business-rule settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidationContext {
    /// Highest accepted timestamp so far in this session
    pub watermark: Option<i64>,
    pub enforce_monotonic: bool,
    pub max_future_skew_ns: Option<i64>,
}

impl ValidationContext {
    pub fn from_config(config: &TickDbConfig) -> Self {
        Self {
            watermark: None,
            enforce_monotonic: config.enforce_monotonic_time,
            max_future_skew_ns: config
                .max_future_skew_secs
                .map(|secs| i64::try_from(secs).unwrap_or(i64::MAX / 1_000_000_000).saturating_mul(1_000_000_000)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    /// Row index in the input batch
    pub row: usize,
    pub reason: ReasonCode,
    pub detail: String,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub accepted: Batch,
    pub rejected: Vec<RejectedRow>,
    /// Watermark after this batch; carry it into the next context
    pub watermark: Option<i64>,
}

/// A schema with its patterns compiled
pub struct Validator {
    schema: Arc<Schema>,
    patterns: Vec<Option<Regex>>,
    time_index: usize,
    key_indices: Vec<usize>,
}

impl Validator {
    pub fn new(schema: Arc<Schema>) -> SchemaResult<Self> {
        let invalid = |reason: String| SchemaError::invalid(&schema.schema_id, schema.version, reason);

        let mut patterns = Vec::with_capacity(schema.fields.len());
        for field in &schema.fields {
            let compiled = match field.constraints.pattern.as_deref() {
                // Anchored at the start, like a prefix match
                Some(pattern) => Some(
                    Regex::new(&format!(r"\A(?:{})", pattern))
                        .map_err(|e| invalid(format!("field '{}': {}", field.name, e)))?,
                ),
                None => None,
            };
            patterns.push(compiled);
        }

        let time_index = schema
            .time_field_index()
            .ok_or_else(|| invalid(format!("time field '{}' is not declared", schema.time_field)))?;
        let key_indices = schema
            .key_fields
            .iter()
            .map(|k| {
                schema
                    .field_index(k)
                    .ok_or_else(|| invalid(format!("key field '{}' is not declared", k)))
            })
            .collect::<SchemaResult<Vec<_>>>()?;

        Ok(Self {
            schema,
            patterns,
            time_index,
            key_indices,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn validate(&self, batch: &Batch, context: &ValidationContext) -> ValidationOutcome {
        let mut accepted = batch.empty_like();
        let mut rejected = Vec::new();
        let mut watermark = context.watermark;
        let mut seen_keys = HashSet::new();

        for row in 0..batch.len() {
            let provenance = batch.provenance(row);
            let checked = self
                .check_row(batch, row, provenance)
                .and_then(|values| self.check_session(batch, values, watermark, context))
                .and_then(|values| self.check_key(values, &mut seen_keys));

            match checked {
                Ok(values) => {
                    if let Some(ts) = values[self.time_index].as_timestamp() {
                        watermark = Some(watermark.map_or(ts, |w| w.max(ts)));
                    }
                    accepted.push_row(values, RowProvenance::new(provenance.raw.clone()));
                }
                Err((reason, detail)) => rejected.push(RejectedRow {
                    row,
                    reason,
                    detail,
                    raw: provenance.raw.clone(),
                }),
            }
        }

        ValidationOutcome {
            accepted,
            rejected,
            watermark,
        }
    }

    /// Steps 1 to 5: everything that depends on the row alone
    fn check_row(
        &self,
        batch: &Batch,
        row: usize,
        provenance: &RowProvenance,
    ) -> Result<Vec<Value>, (ReasonCode, String)> {
        if let Some(ref detail) = provenance.decode_error {
            return Err((ReasonCode::DecodeError, detail.clone()));
        }
        if !provenance.undeclared.is_empty() {
            return Err(rejection(format!(
                "undeclared fields: {}",
                provenance.undeclared.join(", ")
            )));
        }

        let raw_values = batch.declared_row(row);
        let mut values = Vec::with_capacity(raw_values.len());
        for ((field, raw), pattern) in self.schema.fields.iter().zip(raw_values).zip(&self.patterns) {
            let value = coerce(raw, field.field_type)
                .map_err(|e| rejection(format!("field '{}': {}", field.name, e)))?;
            check_field(field, &value, pattern.as_ref()).map_err(rejection)?;
            values.push(value);
        }
        Ok(values)
    }

    /// Steps 6 and 7: rules that depend on the session and batch
    fn check_session(
        &self,
        batch: &Batch,
        values: Vec<Value>,
        watermark: Option<i64>,
        context: &ValidationContext,
    ) -> Result<Vec<Value>, (ReasonCode, String)> {
        let Some(ts) = values[self.time_index].as_timestamp() else {
            return Err(rejection(format!(
                "time field '{}' is missing",
                self.schema.time_field
            )));
        };

        if context.enforce_monotonic {
            if let Some(mark) = watermark {
                if ts < mark {
                    return Err(rejection(format!(
                        "timestamp {} precedes session watermark {}",
                        ts, mark
                    )));
                }
            }
        }

        if let Some(skew) = context.max_future_skew_ns {
            let limit = batch.ingest_ts().saturating_add(skew);
            if ts > limit {
                return Err(rejection(format!(
                    "timestamp {} is more than {}ns ahead of ingest time {}",
                    ts,
                    skew,
                    batch.ingest_ts()
                )));
            }
        }

        Ok(values)
    }

    /// Step 8
    fn check_key(
        &self,
        values: Vec<Value>,
        seen: &mut HashSet<String>,
    ) -> Result<Vec<Value>, (ReasonCode, String)> {
        if self.key_indices.is_empty() {
            return Ok(values);
        }
        let key = canonical_key(self.key_indices.iter().map(|&i| &values[i]));
        if !seen.insert(key) {
            let shown: Vec<String> = self
                .key_indices
                .iter()
                .map(|&i| values[i].to_string())
                .collect();
            return Err(rejection(format!(
                "duplicate key ({}) = ({}) within batch",
                self.schema.key_fields.join(", "),
                shown.join(", ")
            )));
        }
        Ok(values)
    }
}

/// Validates one batch; compiles the schema's patterns on every call
pub fn validate(
    batch: &Batch,
    schema: Arc<Schema>,
    context: &ValidationContext,
) -> SchemaResult<ValidationOutcome> {
    Ok(Validator::new(schema)?.validate(batch, context))
}

fn rejection(detail: String) -> (ReasonCode, String) {
    (ReasonCode::ValidationError, detail)
}

fn check_field(field: &FieldDef, value: &Value, pattern: Option<&Regex>) -> Result<(), String> {
    let constraints = &field.constraints;
    let name = &field.name;

    if value.is_null() {
        return if field.nullable {
            Ok(())
        } else {
            Err(format!("field '{}' is required", name))
        };
    }

    let number = match value {
        Value::Int64(v) => Some(*v as f64),
        Value::Float64(v) => Some(*v),
        _ => None,
    };
    if let Some(n) = number {
        if let Some(min) = constraints.min_value {
            if n < min {
                return Err(format!("field '{}': {} is below minimum {}", name, value, min));
            }
        }
        if let Some(max) = constraints.max_value {
            if n > max {
                return Err(format!("field '{}': {} is above maximum {}", name, value, max));
            }
        }
    }

    if let Value::String(s) = value {
        let len = s.chars().count();
        if let Some(min) = constraints.min_length {
            if len < min {
                return Err(format!("field '{}': length {} is below {}", name, len, min));
            }
        }
        if let Some(max) = constraints.max_length {
            if len > max {
                return Err(format!("field '{}': length {} is above {}", name, len, max));
            }
        }
        if let Some(regex) = pattern {
            if !regex.is_match(s) {
                return Err(format!(
                    "field '{}': {:?} does not match pattern {}",
                    name,
                    s,
                    constraints.pattern.as_deref().unwrap_or_default()
                ));
            }
        }
        if let Some(ref allowed) = constraints.allowed {
            if !allowed.iter().any(|a| a == s) {
                return Err(format!(
                    "field '{}': {:?} is not one of [{}]",
                    name,
                    s,
                    allowed.join(", ")
                ));
            }
        }
    }

    Ok(())
}

/// Length-prefixed rendering so that distinct keys never collide
fn canonical_key<'a>(values: impl Iterator<Item = &'a Value>) -> String {
    let mut key = String::new();
    for value in values {
        let text = value.to_json().to_string();
        key.push_str(value.type_name());
        key.push(':');
        key.push_str(&text.len().to_string());
        key.push(':');
        key.push_str(&text);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::InputFormat;
    use crate::schema::{ticks_v1, FieldType};

    const T0: i64 = 1_704_067_200_000_000_000;

    fn text(s: &str) -> Value {
        Value::String(s.to_string())
    }

    fn tick(ts: &str, symbol: &str, price: &str, size: &str, side: Option<&str>) -> Vec<Value> {
        vec![
            text(ts),
            text(symbol),
            text(price),
            text(size),
            side.map_or(Value::Null, text),
            Value::Null,
        ]
    }

    fn ticks_batch(rows: Vec<Vec<Value>>) -> Batch {
        let schema = ticks_v1();
        let mut batch = Batch::new(&schema, "feed", T0, InputFormat::Ndjson);
        for values in rows {
            batch.push_row(values, RowProvenance::new(b"raw".to_vec()));
        }
        batch
    }

    fn validator() -> Validator {
        Validator::new(Arc::new(ticks_v1())).unwrap()
    }

    fn monotonic() -> ValidationContext {
        ValidationContext {
            watermark: None,
            enforce_monotonic: true,
            max_future_skew_ns: None,
        }
    }

    // =========================================================================
    // Field checks
    // =========================================================================

    #[test]
    fn test_valid_rows_are_coerced() {
        let batch = ticks_batch(vec![tick("2024-01-01T00:00:00Z", "AAPL", "10.5", "100", Some("buy"))]);
        let outcome = validator().validate(&batch, &monotonic());

        assert!(outcome.rejected.is_empty());
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(
            outcome.accepted.declared_row(0),
            vec![
                &Value::Timestamp(T0),
                &text("AAPL"),
                &Value::Float64(10.5),
                &Value::Int64(100),
                &text("buy"),
                &Value::Null,
            ]
        );
        assert_eq!(outcome.watermark, Some(T0));
        assert_eq!(outcome.accepted.column("source_id").unwrap().values[0], text("feed"));
    }

    #[test]
    fn test_non_numeric_price_rejected() {
        let batch = ticks_batch(vec![
            tick("1", "A", "abc", "1", None),
            tick("2", "A", "3", "1", None),
        ]);
        let outcome = validator().validate(&batch, &monotonic());

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.rejected.len(), 1);
        let rejected = &outcome.rejected[0];
        assert_eq!(rejected.row, 0);
        assert_eq!(rejected.reason, ReasonCode::ValidationError);
        assert!(rejected.detail.contains("price"));
        assert_eq!(rejected.raw, b"raw");
    }

    #[test]
    fn test_constraints_enforced() {
        let batch = ticks_batch(vec![
            tick("1", "A", "-1", "1", None),
            tick("2", "", "1", "1", None),
            tick("3", "A", "1", "1", Some("hold")),
            tick("4", "A", "1", "-5", None),
        ]);
        let outcome = validator().validate(&batch, &ValidationContext::default());

        assert_eq!(outcome.accepted.len(), 0);
        let details: Vec<&str> = outcome.rejected.iter().map(|r| r.detail.as_str()).collect();
        assert!(details[0].contains("below minimum"));
        assert!(details[1].contains("length 0"));
        assert!(details[2].contains("not one of"));
        assert!(details[3].contains("size"));
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let mut row = tick("1", "A", "1", "1", None);
        row[1] = Value::Null;
        let outcome = validator().validate(&ticks_batch(vec![row]), &monotonic());
        assert_eq!(outcome.rejected[0].detail, "field 'symbol' is required");
    }

    #[test]
    fn test_pattern_anchored_at_start() {
        let schema = Schema::new(
            "codes",
            1,
            vec![
                FieldDef::required("ts", FieldType::Timestamp),
                FieldDef::required("code", FieldType::String).with_pattern("[A-Z]{3}"),
            ],
            "ts",
        );
        let mut batch = Batch::new(&schema, "s", 0, InputFormat::Ndjson);
        for code in ["ABC", "ABCD", "xABC"] {
            batch.push_row(vec![Value::Int64(1), text(code)], RowProvenance::default());
        }
        let outcome = validate(&batch, Arc::new(schema), &ValidationContext::default()).unwrap();
        assert_eq!(outcome.accepted.len(), 2);
        assert_eq!(outcome.rejected[0].row, 2);
    }

    // =========================================================================
    // Provenance
    // =========================================================================

    #[test]
    fn test_decode_failures_and_undeclared_fields() {
        let schema = ticks_v1();
        let mut batch = Batch::new(&schema, "feed", T0, InputFormat::Ndjson);
        batch.push_decode_failure(b"{oops".to_vec(), "invalid JSON");
        let mut provenance = RowProvenance::new(b"x".to_vec());
        provenance.undeclared.push("venue".into());
        batch.push_row(tick("1", "A", "1", "1", None), provenance);

        let outcome = validator().validate(&batch, &monotonic());
        assert_eq!(outcome.rejected[0].reason, ReasonCode::DecodeError);
        assert_eq!(outcome.rejected[0].raw, b"{oops");
        assert_eq!(outcome.rejected[1].reason, ReasonCode::ValidationError);
        assert!(outcome.rejected[1].detail.contains("venue"));
    }

    // =========================================================================
    // Business rules
    // =========================================================================

    #[test]
    fn test_watermark_rejects_regression_and_skips_rejects() {
        let batch = ticks_batch(vec![
            tick("10", "A", "1", "1", None),
            tick("50", "B", "-1", "1", None), // rejected, must not move the mark
            tick("20", "C", "1", "1", None),
            tick("5", "D", "1", "1", None),
        ]);
        let outcome = validator().validate(&batch, &monotonic());

        let rows: Vec<usize> = outcome.rejected.iter().map(|r| r.row).collect();
        assert_eq!(rows, vec![1, 3]);
        assert!(outcome.rejected[1].detail.contains("watermark 20"));
        assert_eq!(outcome.watermark, Some(20));
    }

    #[test]
    fn test_watermark_carries_across_batches() {
        let context = ValidationContext {
            watermark: Some(100),
            ..monotonic()
        };
        let outcome = validator().validate(&ticks_batch(vec![tick("99", "A", "1", "1", None)]), &context);
        assert_eq!(outcome.rejected.len(), 1);

        let relaxed = ValidationContext {
            enforce_monotonic: false,
            ..context
        };
        let outcome = validator().validate(&ticks_batch(vec![tick("99", "A", "1", "1", None)]), &relaxed);
        assert!(outcome.rejected.is_empty());
        assert_eq!(outcome.watermark, Some(100));
    }

    #[test]
    fn test_future_skew() {
        let context = ValidationContext {
            max_future_skew_ns: Some(1_000),
            ..ValidationContext::default()
        };
        let batch = ticks_batch(vec![
            tick(&(T0 + 1_000).to_string(), "A", "1", "1", None),
            tick(&(T0 + 1_001).to_string(), "B", "1", "1", None),
        ]);
        let outcome = validator().validate(&batch, &context);
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.rejected[0].row, 1);
    }

    #[test]
    fn test_duplicate_key_first_wins() {
        let batch = ticks_batch(vec![
            tick("1", "A", "1", "1", None),
            tick("1", "B", "1", "1", None),
            tick("1", "A", "2", "1", None),
        ]);
        let outcome = validator().validate(&batch, &monotonic());
        assert_eq!(outcome.accepted.len(), 2);
        assert_eq!(outcome.rejected[0].row, 2);
        assert!(outcome.rejected[0].detail.starts_with("duplicate key (ts, symbol)"));
    }

    #[test]
    fn test_reason_code_parse() {
        assert_eq!("DecodeError".parse::<ReasonCode>().unwrap(), ReasonCode::DecodeError);
        assert!("Other".parse::<ReasonCode>().is_err());
    }
}
