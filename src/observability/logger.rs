//! Structured JSON logger
//!
//! - One log line = one event
//! - Deterministic key ordering
//! - Explicit severity levels
//! - Synchronous, no buffering
//!
//! Compiled procedures only ever see the [`Logger`] trait; [`JsonLogger`]
//! is the default sink and [`MemoryLogger`] captures events in memory.

use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;

use serde_json::{Map, Value};

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Debug-level detail
    Trace = 0,
    /// Normal operations
    Info = 1,
    /// Recoverable issues
    Warn = 2,
    /// Operation failures
    Error = 3,
}

impl Severity {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Logger contract consumed by the compiler and by compiled procedures.
///
/// `warn` receives the labels locating the failure (procedure, attribute
/// path) and the error itself. It must never panic.
pub trait Logger: Send + Sync {
    /// Reports a recovered failure.
    fn warn(&self, labels: &[&str], error: &dyn fmt::Display);

    /// Reports a structured event. Ignored by default.
    fn event(&self, _severity: Severity, _event: &str, _fields: &[(&str, &str)]) {}
}

/// Logger writing one JSON object per line to stdout (stderr for errors).
#[derive(Debug, Clone, Copy)]
pub struct JsonLogger {
    min_severity: Severity,
}

impl Default for JsonLogger {
    fn default() -> Self {
        Self {
            min_severity: Severity::Info,
        }
    }
}

impl JsonLogger {
    /// Creates a logger dropping events below `min_severity`.
    pub fn new(min_severity: Severity) -> Self {
        Self { min_severity }
    }

    /// Returns the minimum severity written by this logger.
    pub fn min_severity(&self) -> Severity {
        self.min_severity
    }

    /// Formats one event line.
    ///
    /// `event` and `severity` come first, remaining fields are sorted by key.
    pub fn format_line(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
        let mut object = Map::new();
        object.insert("event".into(), Value::String(event.to_string()));
        object.insert("severity".into(), Value::String(severity.as_str().to_string()));

        let mut sorted_fields: Vec<_> = fields.iter().collect();
        sorted_fields.sort_by_key(|(k, _)| *k);

        for (key, value) in sorted_fields {
            object.insert((*key).to_string(), Value::String((*value).to_string()));
        }

        let mut line = Value::Object(object).to_string();
        line.push('\n');
        line
    }

    fn write_to<W: Write>(writer: &mut W, line: &str) {
        // Logging failures are swallowed; observability never aborts work
        let _ = writer.write_all(line.as_bytes());
        let _ = writer.flush();
    }
}

impl Logger for JsonLogger {
    fn warn(&self, labels: &[&str], error: &dyn fmt::Display) {
        let labels = labels.join(".");
        let error = error.to_string();
        self.event(
            Severity::Warn,
            "PROCEDURE_RECOVERED",
            &[("labels", &labels), ("error", &error)],
        );
    }

    fn event(&self, severity: Severity, event: &str, fields: &[(&str, &str)]) {
        if severity < self.min_severity {
            return;
        }
        let line = Self::format_line(severity, event, fields);
        if severity >= Severity::Error {
            Self::write_to(&mut io::stderr(), &line);
        } else {
            Self::write_to(&mut io::stdout(), &line);
        }
    }
}

/// A captured log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub severity: Severity,
    pub event: String,
    pub labels: Vec<String>,
    pub message: String,
}

/// Logger keeping every entry in memory.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all captured entries.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Returns the captured warnings only.
    pub fn warnings(&self) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.severity == Severity::Warn)
            .collect()
    }

    fn push(&self, entry: LogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

impl Logger for MemoryLogger {
    fn warn(&self, labels: &[&str], error: &dyn fmt::Display) {
        self.push(LogEntry {
            severity: Severity::Warn,
            event: "PROCEDURE_RECOVERED".into(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            message: error.to_string(),
        });
    }

    fn event(&self, severity: Severity, event: &str, fields: &[(&str, &str)]) {
        self.push(LogEntry {
            severity,
            event: event.to_string(),
            labels: fields.iter().map(|(k, v)| format!("{}={}", k, v)).collect(),
            message: String::new(),
        });
    }
}
