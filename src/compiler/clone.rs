//! Clone compiler
//!
//! Builds one copier per node, nested the way the flattened graph is:
//! objects copy their declared attributes, arrays map their elements, and
//! join attachments are deep-copied as they are. Attributes the graph does
//! not declare are dropped.

use std::fmt;
use std::sync::Arc;

use chrono::{SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};

use super::CompileContext;
use crate::schema::{NodeKind, ScalarType, SchemaResult};

type Copier = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Structural deep clone of records of one store
#[derive(Clone)]
pub struct CloneFn {
    root: Copier,
}

impl CloneFn {
    pub(crate) fn compile(ctx: &CompileContext<'_>) -> SchemaResult<Self> {
        Ok(Self {
            root: object_copier(ctx, ctx.root)?,
        })
    }

    /// Clones one record, or every record of a list.
    pub fn apply(&self, input: &Value) -> Value {
        match input {
            Value::Array(records) => Value::Array(records.iter().map(|record| (self.root)(record)).collect()),
            record => (self.root)(record),
        }
    }
}

impl fmt::Debug for CloneFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloneFn").finish_non_exhaustive()
    }
}

fn object_copier(ctx: &CompileContext<'_>, node_name: &str) -> SchemaResult<Copier> {
    let node = ctx
        .nodes
        .get(node_name)
        .ok_or_else(|| ctx.config_error(node_name, "node is missing from the compilation"))?;

    let mut fields: Vec<(String, Copier)> = Vec::with_capacity(node.declared_attributes.len());
    for attribute in &node.declared_attributes {
        let copier: Copier = match &attribute.child {
            Some(child) if ctx.virtual_nodes.contains_key(child) => Arc::new(|value: &Value| value.clone()),
            Some(child) => {
                let kind = ctx
                    .nodes
                    .get(child)
                    .map(|node| node.kind)
                    .ok_or_else(|| ctx.config_error(&attribute.name, "nested node is missing"))?;
                let element = object_copier(ctx, child)?;
                match kind {
                    NodeKind::Object => element,
                    NodeKind::Array => Arc::new(move |value: &Value| match value {
                        Value::Array(items) => Value::Array(items.iter().map(|item| element(item)).collect()),
                        _ => Value::Null,
                    }),
                }
            }
            None => scalar_copier(attribute.scalar_type),
        };
        fields.push((attribute.name.clone(), copier));
    }

    let identity_key = ctx.config.identity_key.clone();
    Ok(Arc::new(move |value: &Value| {
        let input = match value.as_object() {
            Some(input) => input,
            None => return Value::Null,
        };
        let mut output = Map::new();
        if let Some(identity) = input.get(&identity_key) {
            output.insert(identity_key.clone(), identity.clone());
        }
        for (name, copier) in &fields {
            if let Some(value) = input.get(name) {
                output.insert(name.clone(), copier(value));
            }
        }
        Value::Object(output)
    }))
}

fn scalar_copier(scalar_type: Option<ScalarType>) -> Copier {
    Arc::new(move |value: &Value| match value {
        Value::Object(_) | Value::Array(_) => Value::String(value.to_string()),
        Value::Number(millis) if scalar_type == Some(ScalarType::Date) => millis
            .as_i64()
            .and_then(iso_date)
            .map(Value::String)
            .unwrap_or_else(|| value.clone()),
        other => other.clone(),
    })
}

fn iso_date(millis: i64) -> Option<String> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|date| date.to_rfc3339_opts(SecondsFormat::Millis, true))
}
