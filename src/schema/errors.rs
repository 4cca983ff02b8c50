//! Schema compiler error types
//!
//! Error codes:
//! - STORE_CONFIGURATION (FATAL)
//! - STORE_BUILD_FAILED (FATAL)
//! - STORE_VALIDATION_FAILED (REJECT)
//! - STORE_ALREADY_REGISTERED (REJECT)
//! - STORE_LOAD_FAILED (FATAL)
//!
//! Runtime failures of user handlers never surface as `SchemaError`; they are
//! reported to the logger as [`TransformerError`] and the value degrades to null.

use std::fmt;

use thiserror::Error;

/// Severity levels for schema errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Request rejected, the registry is untouched
    Reject,
    /// The store cannot be registered
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Reject => write!(f, "REJECT"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Stable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorCode {
    /// Malformed descriptor
    Configuration,
    /// A synthesized procedure is inconsistent
    BuildFailed,
    /// A record violates the compiled schema
    ValidationFailed,
    /// A store name was registered twice
    AlreadyRegistered,
    /// A descriptor file could not be read or parsed
    LoadFailed,
}

impl SchemaErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            SchemaErrorCode::Configuration => "STORE_CONFIGURATION",
            SchemaErrorCode::BuildFailed => "STORE_BUILD_FAILED",
            SchemaErrorCode::ValidationFailed => "STORE_VALIDATION_FAILED",
            SchemaErrorCode::AlreadyRegistered => "STORE_ALREADY_REGISTERED",
            SchemaErrorCode::LoadFailed => "STORE_LOAD_FAILED",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            SchemaErrorCode::ValidationFailed | SchemaErrorCode::AlreadyRegistered => {
                Severity::Reject
            }
            _ => Severity::Fatal,
        }
    }
}

impl fmt::Display for SchemaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Validation failure details
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationDetails {
    /// Field path (e.g., "dishes[0].id")
    pub field: String,
    /// Expected type or condition
    pub expected: String,
    /// Actual value or type found
    pub actual: String,
}

impl ValidationDetails {
    pub fn new(field: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::new(field, "field to be present", "missing")
    }

    pub fn type_mismatch(field: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::new(field, expected, actual)
    }

    pub fn out_of_bounds(field: impl Into<String>, bound: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::new(field, bound, actual)
    }
}

impl fmt::Display for ValidationDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field '{}': expected {}, got {}", self.field, self.expected, self.actual)
    }
}

/// Schema error type with full context
#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    #[error("[{store}] attribute '{attribute}': {rule}")]
    Configuration {
        store: String,
        attribute: String,
        rule: String,
    },

    #[error("[{store}] cannot build {procedure}: {cause}\n{plan}")]
    BuildFailed {
        store: String,
        procedure: String,
        cause: String,
        /// Rendered plan of the rejected procedure
        plan: String,
    },

    #[error("[{store}] record validation failed: {details}")]
    ValidationFailed {
        store: String,
        details: ValidationDetails,
    },

    #[error("store '{store}' is already registered")]
    AlreadyRegistered { store: String },

    #[error("cannot load descriptor '{path}': {reason}")]
    LoadFailed { path: String, reason: String },
}

impl SchemaError {
    /// Create a configuration error naming the offending attribute and rule
    pub fn configuration(
        store: impl Into<String>,
        attribute: impl Into<String>,
        rule: impl Into<String>,
    ) -> Self {
        SchemaError::Configuration {
            store: store.into(),
            attribute: attribute.into(),
            rule: rule.into(),
        }
    }

    /// Create a build error carrying the rendered procedure plan
    pub fn build_failed(
        store: impl Into<String>,
        procedure: impl Into<String>,
        cause: impl Into<String>,
        plan: impl Into<String>,
    ) -> Self {
        SchemaError::BuildFailed {
            store: store.into(),
            procedure: procedure.into(),
            cause: cause.into(),
            plan: plan.into(),
        }
    }

    /// Create a validation failed error
    pub fn validation_failed(store: impl Into<String>, details: ValidationDetails) -> Self {
        SchemaError::ValidationFailed {
            store: store.into(),
            details,
        }
    }

    /// Create an already registered error
    pub fn already_registered(store: impl Into<String>) -> Self {
        SchemaError::AlreadyRegistered { store: store.into() }
    }

    /// Create a load error for an unreadable or malformed descriptor file
    pub fn load_failed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        SchemaError::LoadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns the error code
    pub fn code(&self) -> SchemaErrorCode {
        match self {
            SchemaError::Configuration { .. } => SchemaErrorCode::Configuration,
            SchemaError::BuildFailed { .. } => SchemaErrorCode::BuildFailed,
            SchemaError::ValidationFailed { .. } => SchemaErrorCode::ValidationFailed,
            SchemaError::AlreadyRegistered { .. } => SchemaErrorCode::AlreadyRegistered,
            SchemaError::LoadFailed { .. } => SchemaErrorCode::LoadFailed,
        }
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code().severity()
    }

    /// Returns whether this is a fatal error
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Returns the offending attribute path, if any
    pub fn attribute(&self) -> Option<&str> {
        match self {
            SchemaError::Configuration { attribute, .. } => Some(attribute),
            SchemaError::ValidationFailed { details, .. } => Some(&details.field),
            _ => None,
        }
    }
}

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// A user handler failed while a compiled procedure was running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{procedure} handler for '{attribute}' failed: {message}")]
pub struct TransformerError {
    pub procedure: &'static str,
    pub attribute: String,
    pub message: String,
}

impl TransformerError {
    pub fn new(procedure: &'static str, attribute: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            procedure,
            attribute: attribute.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SchemaErrorCode::Configuration.code(), "STORE_CONFIGURATION");
        assert_eq!(SchemaErrorCode::BuildFailed.code(), "STORE_BUILD_FAILED");
        assert_eq!(SchemaErrorCode::ValidationFailed.code(), "STORE_VALIDATION_FAILED");
        assert_eq!(SchemaErrorCode::AlreadyRegistered.code(), "STORE_ALREADY_REGISTERED");
        assert_eq!(SchemaErrorCode::LoadFailed.code(), "STORE_LOAD_FAILED");
    }

    #[test]
    fn test_severity_levels() {
        assert_eq!(SchemaErrorCode::Configuration.severity(), Severity::Fatal);
        assert_eq!(SchemaErrorCode::BuildFailed.severity(), Severity::Fatal);
        assert_eq!(SchemaErrorCode::ValidationFailed.severity(), Severity::Reject);
        assert_eq!(SchemaErrorCode::AlreadyRegistered.severity(), Severity::Reject);
    }

    #[test]
    fn test_configuration_message_names_attribute_and_rule() {
        let err = SchemaError::configuration("menu", "dishes", "array needs a primary key");
        let display = err.to_string();
        assert!(display.contains("menu"));
        assert!(display.contains("dishes"));
        assert!(display.contains("primary key"));
        assert_eq!(err.attribute(), Some("dishes"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_build_error_includes_plan() {
        let err = SchemaError::build_failed("menu", "aggregate", "empty loop access", "for dishes[] {}");
        assert!(err.to_string().contains("for dishes[] {}"));
    }

    #[test]
    fn test_validation_details_display() {
        let details = ValidationDetails::type_mismatch("age", "int", "string");
        let display = format!("{}", details);
        assert!(display.contains("age"));
        assert!(display.contains("int"));
        assert!(display.contains("string"));
    }

    #[test]
    fn test_transformer_error_display() {
        let err = TransformerError::new("aggregate", "total", "not a number");
        assert_eq!(err.to_string(), "aggregate handler for 'total' failed: not a number");
    }
}
