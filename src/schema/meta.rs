//! Store metadata collected while flattening a descriptor

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use super::descriptor::Handler;
use crate::aggregates::AggregateOp;

/// onValidate / onTransform operand
#[derive(Debug, Clone)]
pub enum Hook {
    Handler(Handler),
    Literal(Value),
}

impl Hook {
    /// Runs the hook for `value` inside `record`.
    ///
    /// A literal hook returns its own value; as a validator it only accepts
    /// values equal to it.
    pub fn apply(&self, value: &Value, record: &Value) -> Result<Value, String> {
        match self {
            Hook::Handler(handler) => handler.call(value, record),
            Hook::Literal(literal) => Ok(literal.clone()),
        }
    }

    pub fn check(&self, value: &Value, record: &Value) -> Result<(), String> {
        match self {
            Hook::Handler(handler) => handler.call(value, record).map(|_| ()),
            Hook::Literal(literal) if literal == value => Ok(()),
            Hook::Literal(literal) => Err(format!("expected {}, found {}", literal, value)),
        }
    }
}

/// A local aggregate: `target` folds every `source` value
#[derive(Debug, Clone, Serialize)]
pub struct AggregateDecl {
    pub target: String,
    pub op: AggregateOp,
    pub source: String,
    #[serde(skip)]
    pub transformer: Option<Handler>,
}

/// An aggregate fed by another store's records
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAggregateDecl {
    pub target: String,
    pub op: AggregateOp,
    pub store: String,
    /// Attribute read from each foreign record; the whole record when absent
    pub source_attribute: Option<String>,
    #[serde(skip)]
    pub transformer: Option<Handler>,
}

impl ExternalAggregateDecl {
    /// Reads the folded value out of one foreign record.
    pub fn source_value(&self, record: &Value) -> Value {
        match &self.source_attribute {
            Some(path) => path
                .split('.')
                .try_fold(record, |value, segment| value.get(segment))
                .cloned()
                .unwrap_or(Value::Null),
            None => record.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinCardinality {
    /// Attachment is a single foreign record
    One,
    /// Attachment is a list of foreign records
    Many,
    /// Foreign records only feed an aggregate
    Aggregate,
}

/// Local attachment point of a joined store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinDecl {
    pub store: String,
    pub path: String,
    pub cardinality: JoinCardinality,
}

/// A field computed from its owning object
#[derive(Debug, Clone, Serialize)]
pub struct ComputedDecl {
    pub path: String,
    #[serde(skip)]
    pub handler: Handler,
}

/// Everything the compilers need to know about one store
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub store_name: String,
    /// Root key attributes, in declaration order
    pub primary_key: Vec<String>,
    /// Attribute path (`dishes[][id]`) to storage column
    #[serde(rename = "jsonToSQL")]
    pub json_to_sql: IndexMap<String, String>,
    /// Storage column to array nesting depth
    pub sort_group: IndexMap<String, usize>,
    /// Key columns ordered by nesting depth
    pub sort_mandatory: Vec<String>,
    pub aggregates: IndexMap<String, AggregateDecl>,
    /// Evaluation order of `aggregates`
    pub aggregates_sort: Vec<String>,
    pub external_aggregates: IndexMap<String, Vec<ExternalAggregateDecl>>,
    pub joins: IndexMap<String, Vec<JoinDecl>>,
    /// Local path to referenced store
    pub references: IndexMap<String, String>,
    pub computeds: Vec<ComputedDecl>,
}

impl Metadata {
    pub fn new(store_name: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
            ..Self::default()
        }
    }

    /// Joined stores in declaration order
    pub fn joined_stores(&self) -> impl Iterator<Item = &str> {
        self.joins.keys().map(String::as_str)
    }

    pub fn is_joined(&self, store: &str) -> bool {
        self.joins.contains_key(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_literal_hook() {
        let hook = Hook::Literal(json!("fixed"));
        assert_eq!(hook.apply(&json!("x"), &Value::Null).unwrap(), json!("fixed"));
        assert!(hook.check(&json!("fixed"), &Value::Null).is_ok());
        assert!(hook.check(&json!("other"), &Value::Null).is_err());
    }

    #[test]
    fn test_external_source_value() {
        let decl = ExternalAggregateDecl {
            target: "total".into(),
            op: AggregateOp::Sum,
            store: "orders".into(),
            source_attribute: Some("price.net".into()),
            transformer: None,
        };
        assert_eq!(decl.source_value(&json!({"price": {"net": 4}})), json!(4));
        assert_eq!(decl.source_value(&json!({"price": 4})), Value::Null);
    }

    #[test]
    fn test_metadata_serializes_json_to_sql() {
        let mut meta = Metadata::new("menu");
        meta.json_to_sql.insert("id".into(), "idMenu".into());
        let encoded = serde_json::to_value(&meta).unwrap();
        assert_eq!(encoded["jsonToSQL"], json!({"id": "idMenu"}));
        assert_eq!(encoded["storeName"], json!("menu"));
    }
}
