//! Observability subsystem
//!
//! Provides structured logging for compilation and for the recovered
//! failures of compiled procedures.
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. No side effects on execution
//! 3. No async or background threads
//! 4. Deterministic output
//!
//! # Usage
//!
//! ```ignore
//! use store_compiler::observability::{JsonLogger, Logger, Severity};
//!
//! let logger = JsonLogger::default();
//! logger.event(Severity::Info, "STORE_COMPILED", &[("store", "menu")]);
//! logger.warn(&["aggregate", "total"], &"transformer failed");
//! ```

mod logger;

pub use logger::{JsonLogger, LogEntry, Logger, MemoryLogger, Severity};

/// Logs a structured event through `logger`.
pub fn log_event(logger: &dyn Logger, severity: Severity, event: &str, fields: &[(&str, &str)]) {
    logger.event(severity, event, fields);
}
