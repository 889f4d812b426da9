//! ObservationScope for begin/complete logging around an operation
//!
//! - Logs `{name}_BEGIN` on creation
//! - Logs `{name}_COMPLETE` or `{name}_FAILED` when closed
//! - Logs `{name}_INCOMPLETE` if dropped without either
//!
//! The scope is `Send`, so it can be held across `.await` points.

use std::time::Instant;

use super::logger::Logger;

/// A scope that logs start and end events for one operation
///
/// ```ignore
/// let scope = ObservationScope::with_fields("UOW_COMMIT", &[("sessions", "3")]);
/// // ... do work ...
/// scope.complete(); // logs UOW_COMMIT_COMPLETE
/// ```
pub struct ObservationScope {
    name: &'static str,
    closed: bool,
    fields: Vec<(&'static str, String)>,
    started: Instant,
}

impl ObservationScope {
    /// Create a new observation scope
    ///
    /// Logs `{name}_BEGIN` immediately.
    pub fn new(name: &'static str) -> Self {
        Self::with_fields(name, &[])
    }

    /// Create a new observation scope carrying fields on every event
    pub fn with_fields(name: &'static str, fields: &[(&'static str, &str)]) -> Self {
        Logger::info(&format!("{}_BEGIN", name), fields);

        Self {
            name,
            closed: false,
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            started: Instant::now(),
        }
    }

    fn close_fields<'a>(
        &'a self,
        elapsed: &'a str,
        extra: &[(&'a str, &'a str)],
    ) -> Vec<(&'a str, &'a str)> {
        let mut all: Vec<(&str, &str)> =
            self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        all.push(("elapsed_ms", elapsed));
        all.extend(extra.iter().copied());
        all
    }

    /// Mark the scope as successfully completed
    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    /// Mark the scope as completed, adding fields to the COMPLETE event
    pub fn complete_with_fields(mut self, extra: &[(&str, &str)]) {
        self.closed = true;
        let elapsed = self.elapsed_ms();
        Logger::info(
            &format!("{}_COMPLETE", self.name),
            &self.close_fields(&elapsed, extra),
        );
    }

    /// Mark the scope as failed; logs `{name}_FAILED` at ERROR
    pub fn fail(mut self, reason: &str) {
        self.closed = true;
        let elapsed = self.elapsed_ms();
        Logger::error(
            &format!("{}_FAILED", self.name),
            &self.close_fields(&elapsed, &[("reason", reason)]),
        );
    }

    /// Mark the scope as failed at FATAL
    pub fn fail_fatal(mut self, reason: &str) {
        self.closed = true;
        let elapsed = self.elapsed_ms();
        Logger::fatal(
            &format!("{}_FAILED", self.name),
            &self.close_fields(&elapsed, &[("reason", reason)]),
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn elapsed_ms(&self) -> String {
        self.started.elapsed().as_millis().to_string()
    }
}

impl Drop for ObservationScope {
    fn drop(&mut self) {
        if !self.closed {
            Logger::warn(
                &format!("{}_INCOMPLETE", self.name),
                &[("reason", "scope dropped without completion")],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}

    #[test]
    fn test_scope_is_send() {
        assert_send::<ObservationScope>();
    }

    #[test]
    fn test_scope_complete_closes() {
        let scope = ObservationScope::new("TEST_OP");
        assert!(!scope.is_closed());
        scope.complete();
    }

    #[test]
    fn test_scope_with_fields() {
        let scope = ObservationScope::with_fields("TEST_OP", &[("sessions", "2")]);
        assert_eq!(scope.fields.len(), 1);
        scope.complete_with_fields(&[("committed", "2")]);
    }

    #[test]
    fn test_scope_fail() {
        let scope = ObservationScope::new("TEST_OP");
        scope.fail("store unavailable");
    }

    #[test]
    fn test_scope_drop_without_close() {
        let _scope = ObservationScope::new("TEST_OP");
    }
}
