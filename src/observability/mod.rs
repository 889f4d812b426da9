//! Observability for the unit-of-work coordinator
//!
//! - Structured logging (one JSON object per line)
//! - Typed lifecycle events
//! - Begin/complete scopes around commits and rollbacks
//! - Lock-free counters
//!
//! Observability is read-only: nothing here changes what a commit does.
//!
//! ```ignore
//! use unitofwork::observability::{Event, Logger, ObservationScope};
//!
//! Logger::info(Event::SessionCommitted.as_str(), &[("session", "session-1")]);
//!
//! let scope = ObservationScope::new("UOW_COMMIT");
//! // ... do work ...
//! scope.complete();
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{CoordinatorMetrics, MetricsSnapshot};
pub use scope::ObservationScope;

/// Log an event at the severity its kind implies
///
/// Fatal events go out at FATAL, everything else at the given severity.
pub fn log_event(event: Event, severity: Severity, fields: &[(&str, &str)]) {
    let severity = if event.is_fatal() {
        Severity::Fatal
    } else {
        severity
    };
    Logger::log(severity, event.as_str(), fields);
}
