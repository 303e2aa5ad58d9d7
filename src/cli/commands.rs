//! CLI command implementations
//!
//! Every command loads the config, opens the data root, runs one operation
//! and prints JSON. Only `init` may create a data root.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde_json::json;

use crate::batch::Value;
use crate::config::TickDbConfig;
use crate::db::TickDb;
use crate::observability::{log_event_with_fields, Event, Logger};
use crate::query::{Filter, QueryPredicate};
use crate::schema::{builtin_schemas, Registration, Schema};
use crate::store::layout::LAYOUT_FILE_NAME;
use crate::validator::{parse_timestamp, ReasonCode};

use super::args::{Command, QuarantineAction};
use super::errors::{CliError, CliResult};
use super::io::{write_line, write_response};

/// Main CLI entry point
///
/// Logs go to stderr so stdout carries only responses and rows.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    Logger::use_stderr();
    run_command(cli.command)
}

pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config } => init(&config),
        Command::Register { config, schema } => register(&config, &schema),
        Command::Load {
            config,
            source,
            schema,
            input,
        } => load(&config, &source, &schema, input.as_deref()),
        Command::Read {
            config,
            sources,
            schema,
            start,
            end,
            fields,
            filters,
            limit,
        } => {
            let predicate = build_predicate(sources, schema, start, end, fields, &filters, limit)?;
            read(&config, &predicate)
        }
        Command::Quarantine { action } => match action {
            QuarantineAction::Export {
                config,
                source,
                reason,
            } => quarantine_export(&config, source.as_deref(), reason.as_deref()),
            QuarantineAction::Replay {
                config,
                schema,
                source,
                reason,
            } => quarantine_replay(&config, &schema, source.as_deref(), reason.as_deref()),
        },
        Command::Gc { config } => gc(&config),
        Command::Partitions { config, source } => partitions(&config, source.as_deref()),
        Command::Schemas { config } => schemas(&config),
        Command::Health { config } => health(&config),
        Command::Metrics { config } => metrics(&config),
    }
}

fn load_config(config_path: &Path) -> CliResult<TickDbConfig> {
    let config = TickDbConfig::load(config_path).map_err(|e| CliError::config_error(e.message()))?;
    let dir = config.data_dir.display().to_string();
    log_event_with_fields(Event::ConfigLoaded, &[("data_dir", &dir)]);
    Ok(config)
}

fn is_initialized(data_dir: &Path) -> bool {
    data_dir.join(LAYOUT_FILE_NAME).exists()
}

/// Opens an existing data root
fn open(config_path: &Path) -> CliResult<TickDb> {
    let config = load_config(config_path)?;
    if !is_initialized(&config.data_dir) {
        return Err(CliError::not_initialized());
    }
    Ok(TickDb::open(config)?)
}

/// Creates the data root and registers the built-in schemas
pub fn init(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    if is_initialized(&config.data_dir) {
        return Err(CliError::already_initialized());
    }

    let db = TickDb::open(config)?;
    let mut registered = Vec::new();
    for schema in builtin_schemas() {
        let id = format!("{}_v{}", schema.schema_id, schema.version);
        db.register_schema(schema)?;
        registered.push(id);
    }

    write_response(json!({"initialized": true, "schemas": registered}))
}

pub fn register(config_path: &Path, schema_path: &Path) -> CliResult<()> {
    let db = open(config_path)?;
    let content = fs::read_to_string(schema_path).map_err(|e| {
        CliError::io_error(format!("Failed to read {}: {}", schema_path.display(), e))
    })?;
    let schema: Schema = serde_json::from_str(&content)
        .map_err(|e| CliError::invalid_argument(format!("Invalid schema JSON: {}", e)))?;

    let (schema_id, version) = (schema.schema_id.clone(), schema.version);
    let outcome = db.register_schema(schema)?;
    write_response(json!({
        "schema_id": schema_id,
        "version": version,
        "registered": outcome == Registration::Registered,
    }))
}

pub fn load(config_path: &Path, source_id: &str, schema_id: &str, input: Option<&Path>) -> CliResult<()> {
    let db = open(config_path)?;
    let report = match input {
        Some(path) => db.load_path(source_id, path, schema_id)?,
        None => db.load(source_id, io::stdin(), schema_id)?,
    };
    write_response(serde_json::to_value(report)?)
}

pub fn read(config_path: &Path, predicate: &QueryPredicate) -> CliResult<()> {
    let db = open(config_path)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    for batch in db.read(predicate)? {
        let batch = batch.map_err(crate::errors::TickDbError::from)?;
        for row in 0..batch.len() {
            serde_json::to_writer(&mut out, &batch.row_json(row))?;
            writeln!(out)?;
        }
    }
    out.flush()?;
    Ok(())
}

pub fn quarantine_export(config_path: &Path, source_id: Option<&str>, reason: Option<&str>) -> CliResult<()> {
    let db = open(config_path)?;
    let reason = parse_reason(reason)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for record in &db.quarantine_export(source_id, reason)? {
        let record = record.map_err(crate::errors::TickDbError::from)?;
        let line = json!({
            "source_id": record.source_id,
            "schema_id": record.schema_id,
            "schema_version": record.schema_version,
            "ingest_ts": record.ingest_ts,
            "reason": record.reason.as_str(),
            "detail": record.detail,
            "input_format": record.input_format.name(),
            "raw_payload": String::from_utf8_lossy(&record.raw_payload),
        });
        write_line(&mut out, &line)?;
    }
    Ok(())
}

pub fn quarantine_replay(
    config_path: &Path,
    schema_id: &str,
    source_id: Option<&str>,
    reason: Option<&str>,
) -> CliResult<()> {
    let db = open(config_path)?;
    let reason = parse_reason(reason)?;
    let report = db.replay_quarantine(source_id, reason, schema_id)?;
    write_response(serde_json::to_value(report)?)
}

pub fn gc(config_path: &Path) -> CliResult<()> {
    let db = open(config_path)?;
    let report = db.gc_orphans()?;
    write_response(json!({
        "files_removed": report.files_removed,
        "bytes_reclaimed": report.bytes_reclaimed,
    }))
}

pub fn partitions(config_path: &Path, source_id: Option<&str>) -> CliResult<()> {
    let db = open(config_path)?;
    let partitions: Vec<_> = db
        .partitions(source_id)?
        .into_iter()
        .map(|p| {
            json!({
                "source_id": p.key.source_id,
                "bucket": p.key.bucket_name(),
                "files": p.file_count,
                "rows": p.row_count,
                "bytes": p.byte_size,
                "min_ts": p.min_ts.map(Value::Timestamp).map(|v| v.to_string()),
                "max_ts": p.max_ts.map(Value::Timestamp).map(|v| v.to_string()),
                "paused": p.paused,
            })
        })
        .collect();
    write_response(json!({ "partitions": partitions }))
}

pub fn schemas(config_path: &Path) -> CliResult<()> {
    let db = open(config_path)?;
    let mut schemas = Vec::new();
    for (schema_id, version) in db.list_schemas() {
        let schema = db.schema(&schema_id, Some(version))?;
        schemas.push(json!({
            "schema_id": schema_id,
            "version": version,
            "description": schema.description,
            "fields": schema.fields.len(),
            "time_field": schema.time_field,
        }));
    }
    write_response(json!({ "schemas": schemas }))
}

pub fn health(config_path: &Path) -> CliResult<()> {
    let db = open(config_path)?;
    write_response(serde_json::to_value(db.health_check())?)
}

/// Totals read from disk
///
/// Counters only live as long as a process, so a one-shot command reports
/// what the data root holds instead.
pub fn metrics(config_path: &Path) -> CliResult<()> {
    let db = open(config_path)?;
    let partitions = db.partitions(None)?;
    let quarantined = db
        .quarantine_export(None, None)?
        .iter()
        .try_fold(0u64, |count, record| record.map(|_| count + 1))
        .map_err(crate::errors::TickDbError::from)?;

    write_response(json!({
        "sources": db.list_sources()?.len(),
        "partitions": partitions.len(),
        "paused_partitions": partitions.iter().filter(|p| p.paused).count(),
        "files": partitions.iter().map(|p| p.file_count).sum::<usize>(),
        "rows": partitions.iter().map(|p| p.row_count).sum::<u64>(),
        "bytes": partitions.iter().map(|p| p.byte_size).sum::<u64>(),
        "quarantined_records": quarantined,
        "schemas": db.list_schemas().len(),
    }))
}

fn parse_reason(reason: Option<&str>) -> CliResult<Option<ReasonCode>> {
    reason
        .map(|r| r.parse::<ReasonCode>().map_err(CliError::invalid_argument))
        .transpose()
}

fn parse_time(label: &str, text: Option<String>, default: i64) -> CliResult<i64> {
    match text {
        Some(text) => parse_timestamp(&text)
            .ok_or_else(|| CliError::invalid_argument(format!("--{}: cannot parse '{}'", label, text))),
        None => Ok(default),
    }
}

fn build_predicate(
    sources: Vec<String>,
    schema: Option<String>,
    start: Option<String>,
    end: Option<String>,
    fields: Vec<String>,
    filters: &[String],
    limit: Option<usize>,
) -> CliResult<QueryPredicate> {
    let mut predicate = QueryPredicate::new(
        parse_time("start", start, i64::MIN)?,
        parse_time("end", end, i64::MAX)?,
    )
    .fields(fields.into_iter().filter(|f| !f.is_empty()));

    if !sources.is_empty() {
        predicate = predicate.sources(sources);
    }
    if let Some(schema) = schema {
        predicate = predicate.schema(schema);
    }
    for filter in filters {
        predicate = predicate.filter(parse_filter(filter)?);
    }
    if let Some(limit) = limit {
        predicate = predicate.limit(limit);
    }
    Ok(predicate)
}

/// Parses `field<op>value`; two-character operators are tried first
fn parse_filter(text: &str) -> CliResult<Filter> {
    const OPS: [&str; 5] = [">=", "<=", "=", ">", "<"];

    let (at, op) = OPS
        .iter()
        .filter_map(|op| text.find(op).map(|at| (at, *op)))
        .min_by_key(|(at, op)| (*at, std::cmp::Reverse(op.len())))
        .ok_or_else(|| CliError::invalid_argument(format!("filter '{}' has no operator", text)))?;

    let field = text[..at].trim();
    let raw = text[at + op.len()..].trim();
    if field.is_empty() || raw.is_empty() {
        return Err(CliError::invalid_argument(format!(
            "filter '{}' must look like field{}value",
            text, op
        )));
    }

    let value = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => Value::from_json(&json).map_err(CliError::invalid_argument)?,
        Err(_) => Value::String(raw.to_string()),
    };
    Ok(match op {
        ">=" => Filter::gte(field, value),
        "<=" => Filter::lte(field, value),
        ">" => Filter::gt(field, value),
        "<" => Filter::lt(field, value),
        _ => Filter::eq(field, value),
    })
}
