//! Scalar vocabulary recognized in descriptors
//!
//! Supported types:
//! - string: UTF-8 string
//! - number: any JSON number
//! - int / integer: integral JSON number
//! - boolean / bool: Boolean
//! - date: RFC 3339 string or epoch milliseconds
//! - email: string with a local part and a domain
//!
//! Conversions: `toNumber`, `toInt`, `toBoolean`.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared scalar type of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    String,
    Number,
    Int,
    Boolean,
    Date,
    Email,
}

impl ScalarType {
    /// Parses a type token
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "string" => Some(ScalarType::String),
            "number" => Some(ScalarType::Number),
            "int" | "integer" => Some(ScalarType::Int),
            "boolean" | "bool" => Some(ScalarType::Boolean),
            "date" => Some(ScalarType::Date),
            "email" => Some(ScalarType::Email),
            _ => None,
        }
    }

    /// Returns the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Number => "number",
            ScalarType::Int => "int",
            ScalarType::Boolean => "boolean",
            ScalarType::Date => "date",
            ScalarType::Email => "email",
        }
    }

    /// Whether string operators (ILIKE) apply to this type
    pub fn is_textual(&self) -> bool {
        matches!(self, ScalarType::String | ScalarType::Email)
    }

    /// Checks a non-null value against this type. No coercion.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ScalarType::String => value.is_string(),
            ScalarType::Number => value.is_number(),
            ScalarType::Int => value.is_i64() || value.is_u64(),
            ScalarType::Boolean => value.is_boolean(),
            ScalarType::Date => match value {
                Value::String(s) => DateTime::parse_from_rfc3339(s).is_ok(),
                Value::Number(n) => n.is_i64() || n.is_u64(),
                _ => false,
            },
            ScalarType::Email => match value.as_str() {
                Some(s) => match s.split_once('@') {
                    Some((local, domain)) => !local.is_empty() && domain.contains('.'),
                    None => false,
                },
                None => false,
            },
        }
    }
}

/// Value conversion applied before validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Conversion {
    #[serde(rename = "toNumber")]
    ToNumber,
    #[serde(rename = "toInt")]
    ToInt,
    #[serde(rename = "toBoolean")]
    ToBoolean,
}

impl Conversion {
    /// Parses a conversion token
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "toNumber" => Some(Conversion::ToNumber),
            "toInt" => Some(Conversion::ToInt),
            "toBoolean" => Some(Conversion::ToBoolean),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Conversion::ToNumber => "toNumber",
            Conversion::ToInt => "toInt",
            Conversion::ToBoolean => "toBoolean",
        }
    }

    /// Converts a value. Unconvertible values become null.
    pub fn apply(&self, value: &Value) -> Value {
        match self {
            Conversion::ToNumber => match value {
                Value::Number(_) => value.clone(),
                Value::String(s) => s.trim().parse::<f64>().map(number_value).unwrap_or(Value::Null),
                Value::Bool(b) => Value::from(*b as i64),
                _ => Value::Null,
            },
            Conversion::ToInt => {
                let number = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    Value::Bool(b) => Some(*b as i64 as f64),
                    _ => None,
                };
                match number {
                    Some(n) if n.is_finite() => Value::from(n.trunc() as i64),
                    _ => Value::Null,
                }
            }
            Conversion::ToBoolean => match value {
                Value::Bool(_) => value.clone(),
                Value::Number(n) => Value::Bool(n.as_f64().map_or(false, |n| n != 0.0)),
                Value::String(s) => match s.trim() {
                    "true" | "1" => Value::Bool(true),
                    "false" | "0" => Value::Bool(false),
                    _ => Value::Null,
                },
                _ => Value::Null,
            },
        }
    }
}

/// Validation-facing directive kept on a declared attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", content = "value", rename_all = "lowercase")]
pub enum ValidationRule {
    Type(ScalarType),
    Conversion(Conversion),
    Optional,
    Min(Value),
    Max(Value),
}

/// Builds a JSON number, keeping integral values integral.
///
/// `0.0` and `0` must compare equal once stored in a record.
pub(crate) fn number_value(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_tokens() {
        assert_eq!(ScalarType::parse("int"), Some(ScalarType::Int));
        assert_eq!(ScalarType::parse("integer"), Some(ScalarType::Int));
        assert_eq!(ScalarType::parse("bool"), Some(ScalarType::Boolean));
        assert_eq!(ScalarType::parse("array"), None);
        assert_eq!(ScalarType::Email.type_name(), "email");
    }

    #[test]
    fn test_accepts_is_strict() {
        assert!(ScalarType::Int.accepts(&json!(3)));
        assert!(!ScalarType::Int.accepts(&json!(3.5)));
        assert!(!ScalarType::Int.accepts(&json!("3")));
        assert!(ScalarType::Number.accepts(&json!(3.5)));
        assert!(ScalarType::Date.accepts(&json!("2024-01-02T03:04:05Z")));
        assert!(ScalarType::Date.accepts(&json!(1704164645000_i64)));
        assert!(!ScalarType::Date.accepts(&json!("yesterday")));
        assert!(ScalarType::Email.accepts(&json!("a@b.io")));
        assert!(!ScalarType::Email.accepts(&json!("@b.io")));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Conversion::ToNumber.apply(&json!("2.5")), json!(2.5));
        assert_eq!(Conversion::ToNumber.apply(&json!("4")), json!(4));
        assert_eq!(Conversion::ToInt.apply(&json!("4.9")), json!(4));
        assert_eq!(Conversion::ToInt.apply(&json!("abc")), Value::Null);
        assert_eq!(Conversion::ToBoolean.apply(&json!("1")), json!(true));
        assert_eq!(Conversion::ToBoolean.apply(&json!(0)), json!(false));
        assert_eq!(Conversion::parse("toInt"), Some(Conversion::ToInt));
    }

    #[test]
    fn test_number_value_keeps_integers() {
        assert_eq!(number_value(0.0), json!(0));
        assert_eq!(number_value(12.0), json!(12));
        assert_eq!(number_value(1.5), json!(1.5));
        assert_eq!(number_value(f64::NAN), Value::Null);
    }
}
