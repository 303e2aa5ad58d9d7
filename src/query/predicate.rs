//! Query predicates and their resolution against registered schemas
//!
//! A `QueryPredicate` is what the caller asks for. Resolving it checks every
//! field and filter value against the schemas in scope and produces a
//! `ResolvedQuery` whose filter values already have the stored type.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::batch::Value;
use crate::schema::{FieldType, Schema, INGEST_TS_COLUMN, SOURCE_ID_COLUMN};
use crate::store::is_valid_source_id;
use crate::validator::parse_timestamp;

use super::errors::{QueryError, QueryResult};

/// Filter operation types
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    /// field = value
    Eq(Value),
    /// field > value
    Gt(Value),
    /// field >= value
    Gte(Value),
    /// field < value
    Lt(Value),
    /// field <= value
    Lte(Value),
}

impl FilterOp {
    pub fn is_equality(&self) -> bool {
        matches!(self, FilterOp::Eq(_))
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            FilterOp::Eq(_) => "eq",
            FilterOp::Gt(_) => "gt",
            FilterOp::Gte(_) => "gte",
            FilterOp::Lt(_) => "lt",
            FilterOp::Lte(_) => "lte",
        }
    }

    pub fn bound(&self) -> &Value {
        match self {
            FilterOp::Eq(v) | FilterOp::Gt(v) | FilterOp::Gte(v) | FilterOp::Lt(v) | FilterOp::Lte(v) => v,
        }
    }

    fn with_bound(&self, value: Value) -> Self {
        match self {
            FilterOp::Eq(_) => FilterOp::Eq(value),
            FilterOp::Gt(_) => FilterOp::Gt(value),
            FilterOp::Gte(_) => FilterOp::Gte(value),
            FilterOp::Lt(_) => FilterOp::Lt(value),
            FilterOp::Lte(_) => FilterOp::Lte(value),
        }
    }

    /// Nulls and incomparable values never match
    pub fn matches(&self, actual: &Value) -> bool {
        let Some(ordering) = actual.compare(self.bound()) else {
            return false;
        };
        match self {
            FilterOp::Eq(_) => ordering == Ordering::Equal,
            FilterOp::Gt(_) => ordering == Ordering::Greater,
            FilterOp::Gte(_) => ordering != Ordering::Less,
            FilterOp::Lt(_) => ordering == Ordering::Less,
            FilterOp::Lte(_) => ordering != Ordering::Greater,
        }
    }
}

/// A single filter (field + operation)
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq(value),
        }
    }

    pub fn gt(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Gt(value),
        }
    }

    pub fn gte(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Gte(value),
        }
    }

    pub fn lt(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Lt(value),
        }
    }

    pub fn lte(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Lte(value),
        }
    }
}

/// What to read
///
/// The time range is inclusive at both ends, in nanoseconds since the epoch.
/// An empty `fields` list projects every stored column.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPredicate {
    pub sources: Option<Vec<String>>,
    pub schema_id: Option<String>,
    pub time_start: i64,
    pub time_end: i64,
    pub filters: Vec<Filter>,
    pub fields: Vec<String>,
    pub limit: Option<usize>,
}

impl QueryPredicate {
    pub fn new(time_start: i64, time_end: i64) -> Self {
        Self {
            sources: None,
            schema_id: None,
            time_start,
            time_end,
            filters: Vec::new(),
            fields: Vec::new(),
            limit: None,
        }
    }

    /// Every row ever stored
    pub fn all() -> Self {
        Self::new(i64::MIN, i64::MAX)
    }

    pub fn source(self, source_id: impl Into<String>) -> Self {
        self.sources([source_id.into()])
    }

    pub fn sources<I, S>(mut self, source_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources
            .get_or_insert_with(Vec::new)
            .extend(source_ids.into_iter().map(Into::into));
        self
    }

    pub fn schema(mut self, schema_id: impl Into<String>) -> Self {
        self.schema_id = Some(schema_id.into());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A predicate checked against the schemas in scope
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuery {
    pub sources: Option<BTreeSet<String>>,
    pub schema_id: Option<String>,
    pub time_start: i64,
    pub time_end: i64,
    /// Filter values carry the stored type of their field
    pub filters: Vec<Filter>,
    /// Output columns, in output order
    pub fields: Vec<String>,
    pub limit: Option<usize>,
}

impl ResolvedQuery {
    pub fn wants_source(&self, source_id: &str) -> bool {
        self.sources.as_ref().map_or(true, |s| s.contains(source_id))
    }
}

/// Column names and types visible to a query
struct Catalog {
    order: Vec<String>,
    types: HashMap<String, FieldType>,
    conflicting: HashSet<String>,
}

impl Catalog {
    fn build(schemas: &[Arc<Schema>]) -> Self {
        let mut catalog = Catalog {
            order: Vec::new(),
            types: HashMap::new(),
            conflicting: HashSet::new(),
        };
        let metadata = [
            (SOURCE_ID_COLUMN, FieldType::String),
            (INGEST_TS_COLUMN, FieldType::Timestamp),
        ];
        let declared = schemas
            .iter()
            .flat_map(|s| s.fields.iter().map(|f| (f.name.as_str(), f.field_type)));

        for (name, field_type) in declared.chain(metadata) {
            match catalog.types.get(name) {
                Some(existing) if *existing != field_type => {
                    catalog.conflicting.insert(name.to_string());
                }
                Some(_) => {}
                None => {
                    catalog.types.insert(name.to_string(), field_type);
                    catalog.order.push(name.to_string());
                }
            }
        }
        catalog
    }

    fn lookup(&self, field: &str) -> QueryResult<FieldType> {
        if self.conflicting.contains(field) {
            return Err(QueryError::type_mismatch(
                field,
                format!(
                    "Field '{}' has different types in different schemas; name a schema",
                    field
                ),
            ));
        }
        self.types
            .get(field)
            .copied()
            .ok_or_else(|| QueryError::unknown_field(field))
    }
}

/// Checks `predicate` against `schemas` without touching any data
pub fn resolve(predicate: &QueryPredicate, schemas: &[Arc<Schema>]) -> QueryResult<ResolvedQuery> {
    if predicate.time_start > predicate.time_end {
        return Err(QueryError::invalid(format!(
            "time_start {} is after time_end {}",
            predicate.time_start, predicate.time_end
        )));
    }

    let sources = match &predicate.sources {
        Some(ids) => {
            if let Some(bad) = ids.iter().find(|id| !is_valid_source_id(id)) {
                return Err(QueryError::invalid(format!("invalid source id '{}'", bad)));
            }
            Some(ids.iter().cloned().collect())
        }
        None => None,
    };

    let catalog = Catalog::build(schemas);

    let mut filters = Vec::with_capacity(predicate.filters.len());
    for filter in &predicate.filters {
        let field_type = catalog.lookup(&filter.field)?;
        let bound = normalize(filter.op.bound(), field_type).ok_or_else(|| {
            QueryError::type_mismatch(
                &filter.field,
                format!(
                    "Cannot compare {} field '{}' with {} value {}",
                    field_type,
                    filter.field,
                    filter.op.bound().type_name(),
                    filter.op.bound()
                ),
            )
        })?;
        filters.push(Filter {
            field: filter.field.clone(),
            op: filter.op.with_bound(bound),
        });
    }

    let fields = if predicate.fields.is_empty() {
        catalog.order.clone()
    } else {
        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(predicate.fields.len());
        for field in &predicate.fields {
            catalog.lookup(field)?;
            if seen.insert(field.as_str()) {
                fields.push(field.clone());
            }
        }
        fields
    };

    Ok(ResolvedQuery {
        sources,
        schema_id: predicate.schema_id.clone(),
        time_start: predicate.time_start,
        time_end: predicate.time_end,
        filters,
        fields,
        limit: predicate.limit,
    })
}

/// Converts a filter value to the stored representation of `field_type`
///
/// Integers widen to floats and count as nanoseconds for timestamps;
/// timestamp text is parsed. Nulls and NaN never compare, so they are refused.
fn normalize(value: &Value, field_type: FieldType) -> Option<Value> {
    match (field_type, value) {
        (FieldType::Int64, Value::Int64(_)) => Some(value.clone()),
        (FieldType::Int64, Value::Float64(f)) if !f.is_nan() => Some(value.clone()),
        (FieldType::Float64, Value::Float64(f)) if !f.is_nan() => Some(value.clone()),
        (FieldType::Float64, Value::Int64(v)) => Some(Value::Float64(*v as f64)),
        (FieldType::Timestamp, Value::Timestamp(_)) => Some(value.clone()),
        (FieldType::Timestamp, Value::Int64(v)) => Some(Value::Timestamp(*v)),
        (FieldType::Timestamp, Value::String(s)) => parse_timestamp(s).map(Value::Timestamp),
        (FieldType::String, Value::String(_)) => Some(value.clone()),
        (FieldType::Bool, Value::Bool(_)) => Some(value.clone()),
        _ => None,
    }
}
