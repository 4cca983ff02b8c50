//! Write-path normalization
//!
//! Applies each attribute's conversion, then its onTransform hook, to a
//! record about to be stored. Hooks receive the record as it was passed in.
//! A failing hook is reported as a [`TransformerError`] and the attribute
//! becomes null. A value the conversion cannot handle is left untouched so
//! validation can reject it.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::errors::TransformerError;
use super::flattener::Flattened;
use super::meta::Hook;
use super::node::{NodeKind, NodeMap, ObjectNode};
use super::validator::make_path;
use crate::observability::Logger;

#[derive(Debug, Clone)]
pub struct RecordTransformer {
    root: String,
    nodes: NodeMap,
    on_transform: IndexMap<String, Hook>,
}

impl RecordTransformer {
    pub fn new(flattened: &Flattened) -> Self {
        Self {
            root: flattened.root.clone(),
            nodes: flattened.nodes.clone(),
            on_transform: flattened.on_transform.clone(),
        }
    }

    /// Whether the store declares neither conversions nor onTransform hooks
    pub fn is_empty(&self) -> bool {
        self.on_transform.is_empty() && self.nodes.values().all(|node| node.transform_map.is_empty())
    }

    pub fn apply(&self, record: &mut Value, logger: &dyn Logger) {
        if self.is_empty() {
            return;
        }
        let root = match self.nodes.get(&self.root) {
            Some(root) => root,
            None => return,
        };
        let context = record.clone();
        if let Some(object) = record.as_object_mut() {
            self.transform_object(root, object, "", &context, logger);
        }
    }

    fn transform_object(
        &self,
        node: &ObjectNode,
        object: &mut Map<String, Value>,
        prefix: &str,
        context: &Value,
        logger: &dyn Logger,
    ) {
        for attribute in &node.declared_attributes {
            let path = make_path(prefix, &attribute.name);
            let value = match object.get_mut(&attribute.name) {
                Some(value) if !value.is_null() => value,
                _ => continue,
            };

            match &attribute.child {
                Some(child) => {
                    if let Some(child) = self.nodes.get(child) {
                        self.transform_nested(child, value, &path, context, logger);
                    }
                }
                None => {
                    if let Some(conversion) = node.transform_map.get(&attribute.name) {
                        let converted = conversion.apply(value);
                        if !converted.is_null() {
                            *value = converted;
                        }
                    }
                }
            }

            if let Some(hook) = self.on_transform.get(&path) {
                *value = match hook.apply(value, context) {
                    Ok(transformed) => transformed,
                    Err(message) => {
                        logger.warn(
                            &["onTransform", path.as_str()],
                            &TransformerError::new("onTransform", path.as_str(), message),
                        );
                        Value::Null
                    }
                };
            }
        }
    }

    fn transform_nested(&self, node: &ObjectNode, value: &mut Value, path: &str, context: &Value, logger: &dyn Logger) {
        match node.kind {
            NodeKind::Object => {
                if let Some(object) = value.as_object_mut() {
                    self.transform_object(node, object, path, context, logger);
                }
            }
            NodeKind::Array => {
                if let Some(elements) = value.as_array_mut() {
                    for object in elements.iter_mut().filter_map(Value::as_object_mut) {
                        self.transform_object(node, object, path, context, logger);
                    }
                }
            }
        }
    }
}
