//! Versioned schema registry backed by one JSON file per version
//!
//! - Files live at `<data_dir>/schemas/schema_<id>_v<version>.json`
//! - A schema is written and fsynced before it becomes visible
//! - A malformed file on open is FATAL

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::crash_point::{maybe_crash, points};
use crate::durable::write_file_durable;
use crate::observability::{log_event_with_fields, Event};

use super::errors::{SchemaError, SchemaResult};
use super::types::Schema;

/// Outcome of a successful `register`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Newly persisted
    Registered,
    /// Identical definition already present; nothing written
    AlreadyRegistered,
}

pub struct SchemaRegistry {
    schema_dir: PathBuf,
    schemas: BTreeMap<String, BTreeMap<u32, Arc<Schema>>>,
}

impl SchemaRegistry {
    /// Opens the registry under `<data_dir>/schemas`, loading every persisted version
    pub fn open(data_dir: &Path) -> SchemaResult<Self> {
        let mut registry = Self {
            schema_dir: data_dir.join("schemas"),
            schemas: BTreeMap::new(),
        };
        registry.load_all()?;
        Ok(registry)
    }

    pub fn schema_dir(&self) -> &Path {
        &self.schema_dir
    }

    fn load_all(&mut self) -> SchemaResult<()> {
        if !self.schema_dir.exists() {
            return Ok(());
        }

        let dir = self.schema_dir.display().to_string();
        let entries = fs::read_dir(&self.schema_dir)
            .map_err(|e| SchemaError::malformed(&dir, format!("Failed to read directory: {}", e)))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| SchemaError::malformed(&dir, format!("Failed to read entry: {}", e)))?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            // Skip temp files left by an interrupted persist
            if name.starts_with('.') || path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            paths.push(path);
        }
        paths.sort();

        for path in paths {
            self.load_schema_file(&path)?;
        }

        let count = self.schema_count().to_string();
        log_event_with_fields(Event::SchemasLoaded, &[("count", &count), ("dir", &dir)]);
        Ok(())
    }

    fn load_schema_file(&mut self, path: &Path) -> SchemaResult<()> {
        let display = path.display().to_string();
        let content = fs::read_to_string(path)
            .map_err(|e| SchemaError::malformed(&display, format!("Failed to read file: {}", e)))?;

        let schema: Schema = serde_json::from_str(&content)
            .map_err(|e| SchemaError::malformed(&display, format!("Invalid JSON: {}", e)))?;

        schema
            .validate_structure()
            .map_err(|e| SchemaError::malformed(&display, e))?;

        let expected = file_name_for(&schema.schema_id, schema.version);
        if path.file_name().map_or(true, |n| n.to_string_lossy() != expected) {
            return Err(SchemaError::malformed(
                &display,
                format!("file name does not match contents, expected {}", expected),
            ));
        }

        self.schemas
            .entry(schema.schema_id.clone())
            .or_default()
            .insert(schema.version, Arc::new(schema));
        Ok(())
    }

    /// Registers a schema version
    ///
    /// Identical re-registration is a no-op. A different definition under an
    /// existing id+version is a conflict. A new version must exceed the latest
    /// and extend it with nullable fields only.
    pub fn register(&mut self, schema: Schema) -> SchemaResult<Registration> {
        schema
            .validate_structure()
            .map_err(|e| SchemaError::invalid(&schema.schema_id, schema.version, e))?;

        if let Some(existing) = self.lookup(&schema.schema_id, schema.version) {
            return if *existing == schema {
                Ok(Registration::AlreadyRegistered)
            } else {
                Err(SchemaError::conflict(&schema.schema_id, schema.version))
            };
        }

        if let Some(latest) = self.latest(&schema.schema_id) {
            check_evolution(&latest, &schema)?;
        }

        self.persist(&schema)?;

        let version = schema.version.to_string();
        log_event_with_fields(
            Event::SchemaRegistered,
            &[("schema_id", &schema.schema_id), ("version", &version)],
        );

        self.schemas
            .entry(schema.schema_id.clone())
            .or_default()
            .insert(schema.version, Arc::new(schema));
        Ok(Registration::Registered)
    }

    fn persist(&self, schema: &Schema) -> SchemaResult<()> {
        let path = self
            .schema_dir
            .join(file_name_for(&schema.schema_id, schema.version));
        let content = serde_json::to_vec_pretty(schema).map_err(|e| {
            SchemaError::invalid(&schema.schema_id, schema.version, format!("serialize: {}", e))
        })?;

        maybe_crash(points::SCHEMA_BEFORE_PERSIST);

        write_file_durable(&path, &content)
            .map_err(|e| SchemaError::persist_failed(&schema.schema_id, schema.version, e))
    }

    /// Returns the requested version, or the latest when `version` is `None`
    pub fn get(&self, schema_id: &str, version: Option<u32>) -> SchemaResult<Arc<Schema>> {
        let found = match version {
            Some(v) => self.lookup(schema_id, v),
            None => self.latest(schema_id),
        };
        found.ok_or_else(|| SchemaError::not_found(schema_id, version))
    }

    fn lookup(&self, schema_id: &str, version: u32) -> Option<Arc<Schema>> {
        self.schemas
            .get(schema_id)
            .and_then(|versions| versions.get(&version))
            .cloned()
    }

    pub fn latest(&self, schema_id: &str) -> Option<Arc<Schema>> {
        self.schemas
            .get(schema_id)
            .and_then(|versions| versions.values().next_back())
            .cloned()
    }

    /// All (id, version) pairs in id then version order
    pub fn list(&self) -> Vec<(String, u32)> {
        self.schemas
            .iter()
            .flat_map(|(id, versions)| versions.keys().map(move |v| (id.clone(), *v)))
            .collect()
    }

    /// Latest version of every registered id
    pub fn latest_all(&self) -> Vec<Arc<Schema>> {
        self.schemas
            .values()
            .filter_map(|versions| versions.values().next_back().cloned())
            .collect()
    }

    pub fn schema_count(&self) -> usize {
        self.schemas.values().map(BTreeMap::len).sum()
    }
}

fn file_name_for(schema_id: &str, version: u32) -> String {
    format!("schema_{}_v{}.json", schema_id, version)
}

/// Additive, nullable-only evolution from `latest` to `next`
fn check_evolution(latest: &Schema, next: &Schema) -> SchemaResult<()> {
    let fail = |reason: String| Err(SchemaError::invalid_evolution(&next.schema_id, next.version, reason));

    if next.version <= latest.version {
        return fail(format!(
            "version must exceed latest version {}",
            latest.version
        ));
    }
    if next.fields.len() < latest.fields.len() {
        return fail("fields cannot be removed".into());
    }
    for (old, new) in latest.fields.iter().zip(&next.fields) {
        if old != new {
            return fail(format!(
                "field '{}' changed; existing fields must keep name, order, type, nullability and constraints",
                old.name
            ));
        }
    }
    for added in &next.fields[latest.fields.len()..] {
        if !added.nullable {
            return fail(format!("added field '{}' must be nullable", added.name));
        }
    }
    if next.time_field != latest.time_field {
        return fail("time field cannot change".into());
    }
    if next.key_fields != latest.key_fields {
        return fail("key fields cannot change".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::errors::SchemaErrorCode;
    use crate::schema::types::{FieldDef, FieldType};
    use tempfile::TempDir;

    fn quotes(version: u32) -> Schema {
        Schema::new(
            "quotes",
            version,
            vec![
                FieldDef::required("ts", FieldType::Timestamp),
                FieldDef::required("bid", FieldType::Float64),
            ],
            "ts",
        )
    }

    // =========================================================================
    // Registration
    // =========================================================================

    #[test]
    fn test_register_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = SchemaRegistry::open(temp_dir.path()).unwrap();

        assert_eq!(registry.register(quotes(1)).unwrap(), Registration::Registered);
        assert_eq!(*registry.get("quotes", Some(1)).unwrap(), quotes(1));
        assert_eq!(registry.get("quotes", None).unwrap().version, 1);
        assert!(temp_dir.path().join("schemas/schema_quotes_v1.json").exists());
    }

    #[test]
    fn test_identical_registration_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = SchemaRegistry::open(temp_dir.path()).unwrap();

        registry.register(quotes(1)).unwrap();
        assert_eq!(
            registry.register(quotes(1)).unwrap(),
            Registration::AlreadyRegistered
        );
        assert_eq!(registry.schema_count(), 1);
    }

    #[test]
    fn test_conflicting_registration_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = SchemaRegistry::open(temp_dir.path()).unwrap();
        registry.register(quotes(1)).unwrap();

        let mut changed = quotes(1);
        changed.fields[1].field_type = FieldType::Int64;
        let err = registry.register(changed).unwrap_err();
        assert_eq!(err.code(), SchemaErrorCode::TickdbSchemaConflict);
        assert_eq!(registry.get("quotes", Some(1)).unwrap().fields[1].field_type, FieldType::Float64);
    }

    #[test]
    fn test_invalid_structure_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = SchemaRegistry::open(temp_dir.path()).unwrap();

        let mut schema = quotes(1);
        schema.time_field = "bid".into();
        let err = registry.register(schema).unwrap_err();
        assert_eq!(err.code(), SchemaErrorCode::TickdbSchemaInvalid);
        assert_eq!(registry.schema_count(), 0);
    }

    #[test]
    fn test_get_unknown() {
        let temp_dir = TempDir::new().unwrap();
        let registry = SchemaRegistry::open(temp_dir.path()).unwrap();
        let err = registry.get("missing", None).unwrap_err();
        assert_eq!(err.code(), SchemaErrorCode::TickdbSchemaNotFound);
    }

    // =========================================================================
    // Evolution
    // =========================================================================

    #[test]
    fn test_additive_nullable_evolution() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = SchemaRegistry::open(temp_dir.path()).unwrap();
        registry.register(quotes(1)).unwrap();

        let mut v2 = quotes(2);
        v2.fields.push(FieldDef::nullable("ask", FieldType::Float64));
        registry.register(v2).unwrap();

        assert_eq!(registry.get("quotes", None).unwrap().version, 2);
        assert_eq!(registry.list(), vec![("quotes".to_string(), 1), ("quotes".to_string(), 2)]);
    }

    #[test]
    fn test_non_nullable_addition_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = SchemaRegistry::open(temp_dir.path()).unwrap();
        registry.register(quotes(1)).unwrap();

        let mut v2 = quotes(2);
        v2.fields.push(FieldDef::required("ask", FieldType::Float64));
        let err = registry.register(v2).unwrap_err();
        assert_eq!(err.code(), SchemaErrorCode::TickdbInvalidEvolution);
    }

    #[test]
    fn test_removed_or_changed_field_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = SchemaRegistry::open(temp_dir.path()).unwrap();
        registry.register(quotes(1)).unwrap();

        let mut removed = quotes(2);
        removed.fields.pop();
        removed.fields.push(FieldDef::nullable("ask", FieldType::Float64));
        assert_eq!(
            registry.register(removed).unwrap_err().code(),
            SchemaErrorCode::TickdbInvalidEvolution
        );

        let mut retyped = quotes(2);
        retyped.fields[1].nullable = true;
        assert_eq!(
            registry.register(retyped).unwrap_err().code(),
            SchemaErrorCode::TickdbInvalidEvolution
        );
    }

    #[test]
    fn test_version_must_increase() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = SchemaRegistry::open(temp_dir.path()).unwrap();
        registry.register(quotes(5)).unwrap();

        let err = registry.register(quotes(3)).unwrap_err();
        assert_eq!(err.code(), SchemaErrorCode::TickdbInvalidEvolution);
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    #[test]
    fn test_reopen_loads_persisted_versions() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut registry = SchemaRegistry::open(temp_dir.path()).unwrap();
            registry.register(quotes(1)).unwrap();
            let mut v2 = quotes(2);
            v2.fields.push(FieldDef::nullable("ask", FieldType::Float64));
            registry.register(v2).unwrap();
        }

        let registry = SchemaRegistry::open(temp_dir.path()).unwrap();
        assert_eq!(registry.schema_count(), 2);
        assert_eq!(registry.get("quotes", None).unwrap().fields.len(), 3);
    }

    #[test]
    fn test_malformed_file_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("schemas");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("schema_quotes_v1.json"), "{ not json").unwrap();

        let err = SchemaRegistry::open(temp_dir.path()).err().unwrap();
        assert_eq!(err.code(), SchemaErrorCode::TickdbSchemaMalformed);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_temp_files_ignored_on_open() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("schemas");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(".schema_quotes_v1.json.tmp"), "{ partial").unwrap();

        let registry = SchemaRegistry::open(temp_dir.path()).unwrap();
        assert_eq!(registry.schema_count(), 0);
    }
}
