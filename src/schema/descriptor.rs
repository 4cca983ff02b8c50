//! Store descriptors
//!
//! A descriptor is an ordered list of attributes. Each attribute is a
//! directive tuple; `array`/`object` tuples end with a nested descriptor.
//!
//! Handler-free descriptors can be written as JSON:
//!
//! ```ignore
//! let descriptor = Descriptor::from_json(&json!({
//!     "id":     ["int", "<<idMenu>>"],
//!     "label":  ["string", "<labelMenu>"],
//!     "dishes": ["array", { "id": ["int", "<<idDish>>"] }]
//! }))?;
//! ```
//!
//! Handlers (validators, transformers, computed fields) go through the
//! builder API with [`Directive::Handler`].

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::errors::{SchemaError, SchemaResult};

/// Signature shared by every user handler: `(input, context) -> output`.
///
/// - onValidate: `(value, record)`, `Err` rejects the value
/// - onTransform: `(value, record)`, returns the replacement
/// - aggregate transformer: `(value, constants)`
/// - computed field: `(owning object, constants)`
pub type HandlerFn = dyn Fn(&Value, &Value) -> Result<Value, String> + Send + Sync;

/// A user-supplied function embedded in a descriptor
#[derive(Clone)]
pub struct Handler {
    func: Arc<HandlerFn>,
}

impl Handler {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Value, &Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self { func: Arc::new(func) }
    }

    /// Invokes the handler.
    pub fn call(&self, input: &Value, context: &Value) -> Result<Value, String> {
        (self.func)(input, context)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler(..)")
    }
}

/// One element of a directive tuple
#[derive(Debug, Clone)]
pub enum Directive {
    /// A string element, classified by the tokenizer
    Token(String),
    /// A non-string literal (number, bool, null, list)
    Literal(Value),
    Handler(Handler),
    Nested(Descriptor),
}

impl Directive {
    pub fn token(token: impl Into<String>) -> Self {
        Directive::Token(token.into())
    }

    pub fn literal(value: Value) -> Self {
        match value {
            Value::String(s) => Directive::Token(s),
            other => Directive::Literal(other),
        }
    }

    pub fn handler<F>(func: F) -> Self
    where
        F: Fn(&Value, &Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Directive::Handler(Handler::new(func))
    }
}

impl From<&str> for Directive {
    fn from(token: &str) -> Self {
        Directive::Token(token.to_string())
    }
}

impl From<String> for Directive {
    fn from(token: String) -> Self {
        Directive::Token(token)
    }
}

impl From<Value> for Directive {
    fn from(value: Value) -> Self {
        Directive::literal(value)
    }
}

impl From<i64> for Directive {
    fn from(value: i64) -> Self {
        Directive::Literal(Value::from(value))
    }
}

impl From<f64> for Directive {
    fn from(value: f64) -> Self {
        Directive::Literal(Value::from(value))
    }
}

impl From<bool> for Directive {
    fn from(value: bool) -> Self {
        Directive::Literal(Value::Bool(value))
    }
}

impl From<Handler> for Directive {
    fn from(handler: Handler) -> Self {
        Directive::Handler(handler)
    }
}

impl From<Descriptor> for Directive {
    fn from(descriptor: Descriptor) -> Self {
        Directive::Nested(descriptor)
    }
}

/// The value bound to one attribute name
#[derive(Debug, Clone)]
pub enum Attribute {
    Tuple(Vec<Directive>),
    /// A bare string where a tuple was expected (rejected by the flattener)
    Bare(String),
    /// Any other non-tuple value; carries the JSON type name
    Malformed(&'static str),
}

/// Nested store descriptor, attributes kept in declaration order
#[derive(Debug, Clone, Default)]
pub struct Descriptor {
    attributes: Vec<(String, Attribute)>,
}

impl Descriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an attribute declared by a directive tuple.
    pub fn field(mut self, name: impl Into<String>, directives: Vec<Directive>) -> Self {
        self.attributes.push((name.into(), Attribute::Tuple(directives)));
        self
    }

    /// Appends a raw attribute value.
    pub fn attribute(mut self, name: impl Into<String>, attribute: Attribute) -> Self {
        self.attributes.push((name.into(), attribute));
        self
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Attribute)> {
        self.attributes.iter().map(|(name, attr)| (name.as_str(), attr))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Reads a handler-free descriptor from JSON.
    ///
    /// Strings become tokens, objects become nested descriptors, any other
    /// tuple element is a literal.
    pub fn from_json(value: &Value) -> SchemaResult<Self> {
        let object = value.as_object().ok_or_else(|| {
            SchemaError::configuration("*", "$root", "descriptor must be an object")
        })?;

        let mut descriptor = Descriptor::new();
        for (name, attribute) in object {
            let attribute = match attribute {
                Value::Array(elements) => Attribute::Tuple(
                    elements
                        .iter()
                        .map(|element| match element {
                            Value::Object(_) => Descriptor::from_json(element).map(Directive::Nested),
                            other => Ok(Directive::literal(other.clone())),
                        })
                        .collect::<SchemaResult<Vec<_>>>()?,
                ),
                Value::String(s) => Attribute::Bare(s.clone()),
                other => Attribute::Malformed(json_type_name(other)),
            };
            descriptor.attributes.push((name.clone(), attribute));
        }
        Ok(descriptor)
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
