//! Flattened object graph
//!
//! Every nested object or array level of a descriptor becomes one
//! [`ObjectNode`], addressed by a unique name (`main0`, `dishes1`, ...).

use indexmap::IndexMap;
use serde::Serialize;

use super::types::{Conversion, ScalarType, ValidationRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Object,
    Array,
}

/// One declared attribute of a node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDef {
    pub name: String,
    pub scalar_type: Option<ScalarType>,
    /// Validation-facing directives in declaration order
    pub rules: Vec<ValidationRule>,
    /// Unique name of the nested node, if any
    pub child: Option<String>,
    pub column: Option<String>,
    /// Value maintained by the compiler (aggregate target, computed field,
    /// join attachment) rather than supplied by the caller
    pub derived: bool,
}

impl AttributeDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scalar_type: None,
            rules: Vec::new(),
            child: None,
            column: None,
            derived: false,
        }
    }

    pub fn is_optional(&self) -> bool {
        self.rules.iter().any(|rule| matches!(rule, ValidationRule::Optional))
    }

    pub fn conversion(&self) -> Option<Conversion> {
        self.rules.iter().find_map(|rule| match rule {
            ValidationRule::Conversion(conversion) => Some(*conversion),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectNode {
    pub unique_name: String,
    pub parent_name: Option<String>,
    pub attr_name_in_parent: Option<String>,
    pub kind: NodeKind,
    /// Number of array levels from the root down to this node, inclusive
    pub nesting_level: usize,
    pub declared_attributes: Vec<AttributeDef>,
    pub transform_map: IndexMap<String, Conversion>,
    /// Key attribute paths relative to one element of this node
    pub primary_key_attributes: Vec<String>,
    pub child_array_names: Vec<String>,
    /// Enclosing array nodes, outermost first
    pub array_ancestors: Vec<String>,
    /// Shape owned by a joined store; any attribute resolves
    pub is_virtual: bool,
    pub joined_store: Option<String>,
}

impl ObjectNode {
    pub fn root(unique_name: impl Into<String>) -> Self {
        Self {
            unique_name: unique_name.into(),
            parent_name: None,
            attr_name_in_parent: None,
            kind: NodeKind::Object,
            nesting_level: 0,
            declared_attributes: Vec::new(),
            transform_map: IndexMap::new(),
            primary_key_attributes: Vec::new(),
            child_array_names: Vec::new(),
            array_ancestors: Vec::new(),
            is_virtual: false,
            joined_store: None,
        }
    }

    /// Creates a node nested under `parent` at attribute `attr`.
    pub fn child_of(parent: &ObjectNode, unique_name: impl Into<String>, attr: &str, kind: NodeKind) -> Self {
        let mut array_ancestors = parent.array_ancestors.clone();
        if parent.kind == NodeKind::Array {
            array_ancestors.push(parent.unique_name.clone());
        }
        Self {
            unique_name: unique_name.into(),
            parent_name: Some(parent.unique_name.clone()),
            attr_name_in_parent: Some(attr.to_string()),
            kind,
            nesting_level: parent.nesting_level + usize::from(kind == NodeKind::Array),
            array_ancestors,
            ..Self::root("")
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.declared_attributes.iter().find(|attr| attr.name == name)
    }

    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut AttributeDef> {
        self.declared_attributes.iter_mut().find(|attr| attr.name == name)
    }

    pub fn is_array(&self) -> bool {
        self.kind == NodeKind::Array
    }
}

/// Nodes by unique name, in allocation order (root first)
pub type NodeMap = IndexMap<String, ObjectNode>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_tracks_array_ancestors() {
        let root = ObjectNode::root("main0");
        let dishes = ObjectNode::child_of(&root, "dishes1", "dishes", NodeKind::Array);
        let info = ObjectNode::child_of(&dishes, "info2", "info", NodeKind::Object);
        let tags = ObjectNode::child_of(&info, "tags3", "tags", NodeKind::Array);

        assert_eq!(dishes.nesting_level, 1);
        assert!(dishes.array_ancestors.is_empty());
        assert_eq!(info.nesting_level, 1);
        assert_eq!(info.array_ancestors, vec!["dishes1"]);
        assert_eq!(tags.nesting_level, 2);
        assert_eq!(tags.array_ancestors, vec!["dishes1"]);
        assert_eq!(tags.parent_name.as_deref(), Some("info2"));
    }

    #[test]
    fn test_attribute_rules() {
        let mut attr = AttributeDef::new("price");
        attr.rules.push(ValidationRule::Conversion(Conversion::ToNumber));
        attr.rules.push(ValidationRule::Optional);
        assert!(attr.is_optional());
        assert_eq!(attr.conversion(), Some(Conversion::ToNumber));
    }
}
