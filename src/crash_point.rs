//! Crash point injection for durability testing
//!
//! Setting `TICKDB_CRASH_POINT=<name>` makes the process abort the moment
//! execution reaches the named point: no cleanup, no unwinding, no catching.
//! The partition flush path is instrumented so that every step of the
//! commit protocol can be interrupted.
//!
//! ```bash
//! TICKDB_CRASH_POINT=partition_after_data_fsync tickdb load ...
//! ```

use std::sync::OnceLock;

/// Cached crash point name
static CRASH_POINT: OnceLock<Option<String>> = OnceLock::new();

#[inline]
fn get_crash_point() -> Option<&'static str> {
    CRASH_POINT
        .get_or_init(|| std::env::var("TICKDB_CRASH_POINT").ok())
        .as_deref()
}

/// Returns true if `TICKDB_CRASH_POINT` equals the given name.
#[inline]
pub fn crash_point_enabled(name: &str) -> bool {
    get_crash_point().map(|p| p == name).unwrap_or(false)
}

/// Aborts the process if the named crash point is enabled.
///
/// No-op when `TICKDB_CRASH_POINT` is unset or names another point.
#[inline]
pub fn maybe_crash(name: &str) {
    if crash_point_enabled(name) {
        eprintln!("[CRASH] Triggering crash at point: {}", name);
        std::process::abort();
    }
}

/// All defined crash point names
pub mod points {
    // Partition flush
    pub const PARTITION_BEFORE_DATA_WRITE: &str = "partition_before_data_write";
    pub const PARTITION_AFTER_DATA_FSYNC: &str = "partition_after_data_fsync";
    pub const PARTITION_BEFORE_MANIFEST_APPEND: &str = "partition_before_manifest_append";
    pub const PARTITION_AFTER_MANIFEST_APPEND: &str = "partition_after_manifest_append";

    // Quarantine
    pub const QUARANTINE_BEFORE_APPEND: &str = "quarantine_before_append";
    pub const QUARANTINE_AFTER_FSYNC: &str = "quarantine_after_fsync";

    // Schema registry
    pub const SCHEMA_BEFORE_PERSIST: &str = "schema_before_persist";

    // Garbage collection
    pub const GC_BEFORE_REMOVE: &str = "gc_before_remove";

    /// Get all crash point names
    pub fn all() -> &'static [&'static str] {
        &[
            PARTITION_BEFORE_DATA_WRITE,
            PARTITION_AFTER_DATA_FSYNC,
            PARTITION_BEFORE_MANIFEST_APPEND,
            PARTITION_AFTER_MANIFEST_APPEND,
            QUARANTINE_BEFORE_APPEND,
            QUARANTINE_AFTER_FSYNC,
            SCHEMA_BEFORE_PERSIST,
            GC_BEFORE_REMOVE,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_point_disabled_by_default() {
        assert!(!crash_point_enabled("test_point"));
    }

    #[test]
    fn test_all_crash_points_defined() {
        let all = points::all();
        assert_eq!(all.len(), 8);
        assert!(all.contains(&"partition_after_data_fsync"));
        assert!(all.contains(&"quarantine_after_fsync"));
    }

    #[test]
    fn test_crash_point_names_are_lowercase_with_underscores() {
        for point in points::all() {
            assert!(
                point.chars().all(|c| c.is_lowercase() || c == '_'),
                "Crash point '{}' should be lowercase with underscores",
                point
            );
        }
    }
}
