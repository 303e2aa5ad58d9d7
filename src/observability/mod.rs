//! Observability: structured logs, lifecycle events and metrics
//!
//! Observability is read-only. Nothing here can fail or alter the operation
//! being observed, and nothing runs on a background thread.
//!
//! ```ignore
//! use tickdb::observability::{Logger, Event, MetricsRegistry, MetricsSink};
//!
//! Logger::info("QUERY_COMPLETE", &[("rows", "42")]);
//!
//! let metrics = MetricsRegistry::new();
//! metrics.rows_loaded(42);
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSink, MetricsSnapshot, NoopMetrics};
pub use scope::ObservationScope;

fn severity_for(event: Event) -> Severity {
    if event.is_fatal() {
        Severity::Fatal
    } else if event.is_warning() {
        Severity::Warn
    } else {
        Severity::Info
    }
}

/// Log a lifecycle event
pub fn log_event(event: Event) {
    log_event_with_fields(event, &[]);
}

/// Log a lifecycle event with fields
///
/// Fatal events go to stderr.
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    let severity = severity_for(event);
    if severity >= Severity::Error {
        Logger::log_stderr(severity, event.as_str(), fields);
    } else {
        Logger::log(severity, event.as_str(), fields);
    }
}
