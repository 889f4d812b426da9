//! Structured JSON logger
//!
//! One log line = one event. Keys are emitted as `event`, `severity`,
//! `ts`, then the caller's fields sorted by name. Lines at ERROR and above
//! go to stderr, the rest to stdout. A process-wide minimum severity
//! filters everything below it.

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Per-session detail
    Trace = 0,
    /// Normal operations
    Info = 1,
    /// Recoverable issues
    Warn = 2,
    /// Operation failures
    Error = 3,
    /// State may be inconsistent; needs an operator
    Fatal = 4,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    /// Parse a configured level name (case-insensitive)
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "trace" => Some(Severity::Trace),
            "info" => Some(Severity::Info),
            "warn" => Some(Severity::Warn),
            "error" => Some(Severity::Error),
            "fatal" => Some(Severity::Fatal),
            _ => None,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Severity::Trace),
            1 => Some(Severity::Info),
            2 => Some(Severity::Warn),
            3 => Some(Severity::Error),
            4 => Some(Severity::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const LOGGING_OFF: u8 = u8::MAX;

static MIN_SEVERITY: AtomicU8 = AtomicU8::new(Severity::Info as u8);

/// Structured logger writing JSON lines
pub struct Logger;

impl Logger {
    /// Set the minimum severity that is written; `None` turns logging off
    pub fn set_min_severity(level: Option<Severity>) {
        let raw = level.map(|s| s as u8).unwrap_or(LOGGING_OFF);
        MIN_SEVERITY.store(raw, Ordering::Relaxed);
    }

    /// Current minimum severity, `None` when logging is off
    pub fn min_severity() -> Option<Severity> {
        Severity::from_u8(MIN_SEVERITY.load(Ordering::Relaxed))
    }

    pub fn enabled(severity: Severity) -> bool {
        Self::min_severity().map(|min| severity >= min).unwrap_or(false)
    }

    /// Log an event with the given severity and fields
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        if !Self::enabled(severity) {
            return;
        }
        let line = Self::render(severity, event, fields, Utc::now());
        if severity >= Severity::Error {
            Self::write_line(&mut io::stderr().lock(), &line);
        } else {
            Self::write_line(&mut io::stdout().lock(), &line);
        }
    }

    fn write_line<W: Write>(writer: &mut W, line: &str) {
        // Logging must never fail the operation being logged
        let _ = writer.write_all(line.as_bytes());
        let _ = writer.flush();
    }

    /// Render one log line, newline included
    pub(crate) fn render(
        severity: Severity,
        event: &str,
        fields: &[(&str, &str)],
        at: DateTime<Utc>,
    ) -> String {
        let mut line = String::with_capacity(128);
        line.push('{');
        push_pair(&mut line, "event", event);
        line.push(',');
        push_pair(&mut line, "severity", severity.as_str());
        line.push(',');
        push_pair(
            &mut line,
            "ts",
            &at.to_rfc3339_opts(SecondsFormat::Millis, true),
        );

        let mut sorted: Vec<&(&str, &str)> = fields.iter().collect();
        sorted.sort_by_key(|(key, _)| *key);
        for (key, value) in sorted {
            line.push(',');
            push_pair(&mut line, key, value);
        }

        line.push_str("}\n");
        line
    }

    pub fn trace(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Trace, event, fields);
    }

    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, event, fields);
    }

    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }

    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Error, event, fields);
    }

    pub fn fatal(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Fatal, event, fields);
    }
}

fn push_pair(line: &mut String, key: &str, value: &str) {
    line.push_str(&Value::from(key).to_string());
    line.push(':');
    line.push_str(&Value::from(value).to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn render(event: &str, fields: &[(&str, &str)]) -> String {
        Logger::render(Severity::Info, event, fields, fixed_time())
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Trace < Severity::Info);
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
    }

    #[test]
    fn test_parse_levels() {
        assert_eq!(Severity::parse("WARN"), Some(Severity::Warn));
        assert_eq!(Severity::parse("trace"), Some(Severity::Trace));
        assert_eq!(Severity::parse("verbose"), None);
    }

    #[test]
    fn test_render_is_json() {
        let line = render("UOW_COMMIT_BEGIN", &[("sessions", "3")]);
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(parsed["event"], "UOW_COMMIT_BEGIN");
        assert_eq!(parsed["severity"], "INFO");
        assert_eq!(parsed["ts"], "2024-03-01T12:00:00.000Z");
        assert_eq!(parsed["sessions"], "3");
    }

    #[test]
    fn test_fields_sorted_regardless_of_input_order() {
        let a = render("E", &[("zebra", "1"), ("apple", "2"), ("mango", "3")]);
        let b = render("E", &[("mango", "3"), ("zebra", "1"), ("apple", "2")]);
        assert_eq!(a, b);

        let apple = a.find("apple").unwrap();
        let mango = a.find("mango").unwrap();
        let zebra = a.find("zebra").unwrap();
        assert!(apple < mango && mango < zebra);
    }

    #[test]
    fn test_event_and_severity_lead() {
        let line = render("E", &[("aaa", "first alphabetically")]);
        let event = line.find("\"event\"").unwrap();
        let severity = line.find("\"severity\"").unwrap();
        let field = line.find("\"aaa\"").unwrap();
        assert!(event < severity && severity < field);
    }

    #[test]
    fn test_special_characters_escaped() {
        let line = render("E", &[("reason", "bad \"quote\"\nnext")]);
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["reason"], "bad \"quote\"\nnext");
    }

    #[test]
    fn test_exactly_one_line() {
        let line = render("E", &[("a", "1"), ("b", "2")]);
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.ends_with('\n'));
    }
}
