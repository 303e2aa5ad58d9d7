//! Lifecycle events
//!
//! Every event the pipeline logs is named here so event strings stay stable
//! across releases.

use std::fmt;

/// Lifecycle event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    // Open / config
    OpenStart,
    OpenComplete,
    ConfigLoaded,
    SchemasLoaded,
    SchemaRegistered,

    // Ingest
    IngestStart,
    IngestComplete,
    IngestFailed,
    DecodeWorkerFailed,

    // Partition store
    FlushStart,
    FlushCommitted,
    FlushRetry,
    PartitionPaused,
    PartitionResumed,
    OrphanRemoved,
    ManifestCorruption,

    // Quarantine
    QuarantineRecorded,
    QuarantineReplayStart,
    QuarantineReplayMarked,
    QuarantineReplayComplete,

    // Query
    QueryReceived,
    QueryPlanned,
    QueryExecuted,
    QueryRejected,
    ScanRetry,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::OpenStart => "TICKDB_OPEN_BEGIN",
            Event::OpenComplete => "TICKDB_OPEN_COMPLETE",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::SchemasLoaded => "SCHEMAS_LOADED",
            Event::SchemaRegistered => "SCHEMA_REGISTERED",

            Event::IngestStart => "INGEST_START",
            Event::IngestComplete => "INGEST_COMPLETE",
            Event::IngestFailed => "INGEST_FAILED",
            Event::DecodeWorkerFailed => "DECODE_WORKER_FAILED",

            Event::FlushStart => "FLUSH_START",
            Event::FlushCommitted => "FLUSH_COMMITTED",
            Event::FlushRetry => "FLUSH_RETRY",
            Event::PartitionPaused => "PARTITION_PAUSED",
            Event::PartitionResumed => "PARTITION_RESUMED",
            Event::OrphanRemoved => "ORPHAN_REMOVED",
            Event::ManifestCorruption => "MANIFEST_CORRUPTION",

            Event::QuarantineRecorded => "QUARANTINE_RECORDED",
            Event::QuarantineReplayStart => "QUARANTINE_REPLAY_BEGIN",
            Event::QuarantineReplayMarked => "QUARANTINE_REPLAY_MARKED",
            Event::QuarantineReplayComplete => "QUARANTINE_REPLAY_COMPLETE",

            Event::QueryReceived => "QUERY_BEGIN",
            Event::QueryPlanned => "QUERY_PLANNED",
            Event::QueryExecuted => "QUERY_COMPLETE",
            Event::QueryRejected => "QUERY_REJECTED",
            Event::ScanRetry => "SCAN_RETRY",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::ManifestCorruption)
    }

    /// Returns true if the event reports a degraded but recoverable state
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Event::FlushRetry
                | Event::PartitionPaused
                | Event::QueryRejected
                | Event::ScanRetry
                | Event::DecodeWorkerFailed
                | Event::IngestFailed
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_have_string_representation() {
        let events = [
            Event::OpenStart,
            Event::OpenComplete,
            Event::ConfigLoaded,
            Event::SchemasLoaded,
            Event::SchemaRegistered,
            Event::IngestStart,
            Event::IngestComplete,
            Event::IngestFailed,
            Event::DecodeWorkerFailed,
            Event::FlushStart,
            Event::FlushCommitted,
            Event::FlushRetry,
            Event::PartitionPaused,
            Event::PartitionResumed,
            Event::OrphanRemoved,
            Event::ManifestCorruption,
            Event::QuarantineRecorded,
            Event::QuarantineReplayStart,
            Event::QuarantineReplayMarked,
            Event::QuarantineReplayComplete,
            Event::QueryReceived,
            Event::QueryPlanned,
            Event::QueryExecuted,
            Event::QueryRejected,
            Event::ScanRetry,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_fatal_events() {
        assert!(Event::ManifestCorruption.is_fatal());
        assert!(!Event::FlushCommitted.is_fatal());
        assert!(!Event::PartitionPaused.is_fatal());
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", Event::IngestStart), "INGEST_START");
        assert_eq!(format!("{}", Event::OrphanRemoved), "ORPHAN_REMOVED");
    }
}
