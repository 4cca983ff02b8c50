//! Record validator
//!
//! Validation semantics:
//! - Non-optional attributes are present and non-null
//! - Scalar types match exactly once the declared conversion is applied
//! - `min` / `max` bound numbers, string lengths and array lengths
//! - Nested objects and arrays are checked recursively
//! - onValidate hooks accept the (converted) value
//!
//! Attributes maintained by the compiler (aggregate targets, computed
//! fields, join attachments) may be absent. Undeclared attributes are
//! ignored. The validator never mutates records and reports the first
//! violation only.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::errors::{SchemaError, SchemaResult, ValidationDetails};
use super::flattener::Flattened;
use super::json_type_name;
use super::meta::Hook;
use super::node::{AttributeDef, NodeKind, NodeMap, ObjectNode};
use super::types::ValidationRule;

/// Validates records of one store against its compilation.
#[derive(Debug, Clone)]
pub struct RecordValidator {
    store: String,
    root: String,
    nodes: NodeMap,
    on_validate: IndexMap<String, Hook>,
}

/// Position of the value being checked
struct Location<'a> {
    /// Display path with indices (`dishes[0].id`)
    display: String,
    /// Hook path without indices (`dishes.id`)
    hook: String,
    record: &'a Value,
}

impl RecordValidator {
    pub fn new(store: &str, flattened: &Flattened) -> Self {
        Self {
            store: store.to_string(),
            root: flattened.root.clone(),
            nodes: flattened.nodes.clone(),
            on_validate: flattened.on_validate.clone(),
        }
    }

    /// Validates a record.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::ValidationFailed` naming the first offending
    /// attribute.
    pub fn validate(&self, record: &Value) -> SchemaResult<()> {
        let object = record
            .as_object()
            .ok_or_else(|| self.type_error("$root", "object", record))?;
        let root = self.node(&self.root)?;
        let location = Location {
            display: String::new(),
            hook: String::new(),
            record,
        };
        self.validate_object(root, object, &location)
    }

    fn node(&self, name: &str) -> SchemaResult<&ObjectNode> {
        self.nodes.get(name).ok_or_else(|| {
            SchemaError::configuration(&self.store, name, "node is missing from the compilation")
        })
    }

    fn validate_object(&self, node: &ObjectNode, object: &Map<String, Value>, at: &Location<'_>) -> SchemaResult<()> {
        for attribute in &node.declared_attributes {
            let field = Location {
                display: make_path(&at.display, &attribute.name),
                hook: make_path(&at.hook, &attribute.name),
                record: at.record,
            };
            let value = object.get(&attribute.name).unwrap_or(&Value::Null);
            self.validate_attribute(attribute, value, &field)?;
        }
        Ok(())
    }

    fn validate_attribute(&self, attribute: &AttributeDef, value: &Value, at: &Location<'_>) -> SchemaResult<()> {
        let child = match &attribute.child {
            Some(child) => match self.nodes.get(child) {
                Some(node) => Some(node),
                // Join attachment; its shape belongs to another store
                None => return Ok(()),
            },
            None => None,
        };

        if value.is_null() {
            if attribute.is_optional() || attribute.derived {
                return Ok(());
            }
            return Err(self.fail(ValidationDetails::missing_field(&at.display)));
        }

        let converted = match attribute.conversion() {
            Some(conversion) => conversion.apply(value),
            None => value.clone(),
        };
        if converted.is_null() {
            let expected = attribute.conversion().map_or("value", |c| c.token());
            return Err(self.type_error(&at.display, expected, value));
        }

        match child {
            Some(node) => self.validate_nested(node, &converted, at)?,
            None => {
                if let Some(scalar_type) = attribute.scalar_type {
                    if !scalar_type.accepts(&converted) {
                        return Err(self.type_error(&at.display, scalar_type.type_name(), &converted));
                    }
                }
            }
        }

        self.check_bounds(attribute, &converted, at)?;

        if let Some(hook) = self.on_validate.get(&at.hook) {
            hook.check(&converted, at.record).map_err(|reason| {
                self.fail(ValidationDetails::new(&at.display, "value accepted by onValidate", reason))
            })?;
        }
        Ok(())
    }

    fn validate_nested(&self, node: &ObjectNode, value: &Value, at: &Location<'_>) -> SchemaResult<()> {
        match node.kind {
            NodeKind::Object => {
                let object = value
                    .as_object()
                    .ok_or_else(|| self.type_error(&at.display, "object", value))?;
                self.validate_object(node, object, at)
            }
            NodeKind::Array => {
                let elements = value
                    .as_array()
                    .ok_or_else(|| self.type_error(&at.display, "array", value))?;
                for (index, element) in elements.iter().enumerate() {
                    let element_at = Location {
                        display: format!("{}[{}]", at.display, index),
                        hook: at.hook.clone(),
                        record: at.record,
                    };
                    let object = element
                        .as_object()
                        .ok_or_else(|| self.type_error(&element_at.display, "object", element))?;
                    self.validate_object(node, object, &element_at)?;
                }
                Ok(())
            }
        }
    }

    fn check_bounds(&self, attribute: &AttributeDef, value: &Value, at: &Location<'_>) -> SchemaResult<()> {
        let measure = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => Some(s.chars().count() as f64),
            Value::Array(items) => Some(items.len() as f64),
            _ => None,
        };
        let measure = match measure {
            Some(measure) => measure,
            None => return Ok(()),
        };

        for rule in &attribute.rules {
            let (bound, too_far) = match rule {
                ValidationRule::Min(bound) => match bound.as_f64() {
                    Some(min) => (bound, measure < min),
                    None => continue,
                },
                ValidationRule::Max(bound) => match bound.as_f64() {
                    Some(max) => (bound, measure > max),
                    None => continue,
                },
                _ => continue,
            };
            if too_far {
                let kind = if matches!(rule, ValidationRule::Min(_)) { ">=" } else { "<=" };
                return Err(self.fail(ValidationDetails::out_of_bounds(
                    &at.display,
                    format!("{} {}", kind, bound),
                    number_text(measure),
                )));
            }
        }
        Ok(())
    }

    fn fail(&self, details: ValidationDetails) -> SchemaError {
        SchemaError::validation_failed(&self.store, details)
    }

    fn type_error(&self, field: &str, expected: &str, actual: &Value) -> SchemaError {
        self.fail(ValidationDetails::type_mismatch(field, expected, json_type_name(actual)))
    }
}

/// Creates a field path from prefix and field name.
pub(super) fn make_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", prefix, field)
    }
}

fn number_text(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
