//! Primary-key compiler

use serde_json::{Map, Value};

use super::CompileContext;
use crate::schema::{number_value, ScalarType, SchemaResult};

#[derive(Debug, Clone)]
struct KeyAttribute {
    path: Vec<String>,
    scalar_type: Option<ScalarType>,
}

/// Reads and writes the root key of a record
#[derive(Debug, Clone)]
pub struct PrimaryKeyFns {
    keys: Vec<KeyAttribute>,
    separator: String,
}

impl PrimaryKeyFns {
    pub(crate) fn compile(ctx: &CompileContext<'_>) -> SchemaResult<Self> {
        let mut keys = Vec::with_capacity(ctx.meta.primary_key.len());
        for path in &ctx.meta.primary_key {
            let resolved = ctx
                .resolve_strict(path)
                .map_err(|unresolved| ctx.config_error(path, unresolved.to_string()))?;
            if !resolved.is_scalar() || resolved.depth() > 0 {
                return Err(ctx.config_error(path, "primary key must be a scalar outside arrays"));
            }
            keys.push(KeyAttribute {
                scalar_type: resolved.scalar_type(),
                path: resolved.leaf,
            });
        }
        Ok(Self {
            keys,
            separator: ctx.config.key_separator.clone(),
        })
    }

    pub fn is_composite(&self) -> bool {
        self.keys.len() > 1
    }

    /// Key attribute paths, in declaration order
    pub fn key_paths(&self) -> Vec<String> {
        self.keys.iter().map(|key| key.path.join(".")).collect()
    }

    /// Returns the key of `record`, joining composite keys with the
    /// separator. Separators and backslashes inside a part are escaped with
    /// a backslash. `None` when the store has no key or a part is missing.
    pub fn get(&self, record: &Value) -> Option<Value> {
        match self.keys.as_slice() {
            [] => None,
            [key] => super::read_rel(record, &key.path)
                .filter(|value| !value.is_null())
                .cloned(),
            keys => {
                let mut parts = Vec::with_capacity(keys.len());
                for key in keys {
                    let text = key_text(super::read_rel(record, &key.path)?)?;
                    parts.push(escape_part(&text, &self.separator));
                }
                Some(Value::String(parts.join(&self.separator)))
            }
        }
    }

    /// Writes `key` into `record`. Composite keys must be strings holding
    /// one part per key attribute; nothing is written otherwise.
    pub fn set(&self, record: &mut Value, key: &Value) -> bool {
        match self.keys.as_slice() {
            [] => false,
            [single] => write_path(record, &single.path, key.clone()),
            keys => {
                let text = match key.as_str() {
                    Some(text) => text,
                    None => return false,
                };
                let parts = split_parts(text, &self.separator);
                if parts.len() != keys.len() {
                    return false;
                }
                let mut staged = record.clone();
                let written = keys
                    .iter()
                    .zip(&parts)
                    .all(|(key, part)| write_path(&mut staged, &key.path, parse_part(part, key.scalar_type)));
                if written {
                    *record = staged;
                }
                written
            }
        }
    }
}

fn key_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn escape_part(part: &str, separator: &str) -> String {
    let part = part.replace('\\', "\\\\");
    if separator.is_empty() {
        return part;
    }
    part.replace(separator, &format!("\\{}", separator))
}

/// Splits on unescaped separators and unescapes each part.
fn split_parts(text: &str, separator: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        if c == '\\' {
            rest = &rest[1..];
            if let Some(escaped) = rest.chars().next() {
                current.push(escaped);
                rest = &rest[escaped.len_utf8()..];
            }
        } else if !separator.is_empty() && rest.starts_with(separator) {
            parts.push(std::mem::take(&mut current));
            rest = &rest[separator.len()..];
        } else {
            current.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    parts.push(current);
    parts
}

fn parse_part(part: &str, scalar_type: Option<ScalarType>) -> Value {
    match scalar_type {
        Some(ScalarType::Int) | Some(ScalarType::Number) => part
            .parse::<f64>()
            .map(number_value)
            .unwrap_or_else(|_| Value::String(part.to_string())),
        Some(ScalarType::Boolean) => match part {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(part.to_string()),
        },
        _ => Value::String(part.to_string()),
    }
}

/// Writes `value` at `path`, creating missing intermediate objects.
fn write_path(record: &mut Value, path: &[String], value: Value) -> bool {
    let (last, parents) = match path.split_last() {
        Some(split) => split,
        None => return false,
    };
    let mut current = record;
    for key in parents {
        let object = match current.as_object_mut() {
            Some(object) => object,
            None => return false,
        };
        current = object
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
    }
    match current.as_object_mut() {
        Some(object) => {
            object.insert(last.clone(), value);
            true
        }
        None => false,
    }
}
