//! Aggregate kinds
//!
//! An aggregate kind folds values into an [`AggregateState`] through the
//! `start / add / remove` contract. For every kind and value `v`:
//!
//! `remove(add(init(), v), v).value == init().value`
//!
//! Compiled aggregate procedures look kinds up in an [`AggregateRegistry`]
//! at run time, so callers can swap implementations without recompiling.

mod kinds;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use kinds::{Avg, Count, CountBool, Max, Min, Sum};

/// Aggregate keywords recognized in descriptors
///
/// `min` and `max` double as validation bounds; the tokenizer tells them
/// apart by their operand (a path string for aggregates, a literal bound
/// otherwise).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregateOp {
    Sum,
    Count,
    Avg,
    Min,
    Max,
    CountBoolTrue,
    CountBoolFalse,
}

impl AggregateOp {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "sum" => Some(AggregateOp::Sum),
            "count" => Some(AggregateOp::Count),
            "avg" => Some(AggregateOp::Avg),
            "min" => Some(AggregateOp::Min),
            "max" => Some(AggregateOp::Max),
            "countBoolTrue" => Some(AggregateOp::CountBoolTrue),
            "countBoolFalse" => Some(AggregateOp::CountBoolFalse),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            AggregateOp::Sum => "sum",
            AggregateOp::Count => "count",
            AggregateOp::Avg => "avg",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::CountBoolTrue => "countBoolTrue",
            AggregateOp::CountBoolFalse => "countBoolFalse",
        }
    }

    pub fn all() -> [AggregateOp; 7] {
        [
            AggregateOp::Sum,
            AggregateOp::Count,
            AggregateOp::Avg,
            AggregateOp::Min,
            AggregateOp::Max,
            AggregateOp::CountBoolTrue,
            AggregateOp::CountBoolFalse,
        ]
    }
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

/// Accumulator owned by the caller, exposing the current `value`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateState {
    pub value: Value,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub sum: f64,
    /// Sorted multiset of folded values (min/max only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<f64>,
}

impl AggregateState {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }
}

/// Persisted aggregate states, keyed by the JSON pointer of the target
/// attribute inside one record (e.g. `/carts/0/total`).
pub type AggregateStates = HashMap<String, AggregateState>;

/// The `start / add / remove` contract of one aggregate kind
pub trait AggregateKind: Send + Sync {
    fn start_value(&self) -> Value;

    fn init(&self) -> AggregateState {
        AggregateState::new(self.start_value())
    }

    fn add(&self, state: AggregateState, value: &Value) -> AggregateState;

    fn remove(&self, state: AggregateState, value: &Value) -> AggregateState;
}

/// Aggregate kinds available to compiled procedures
pub struct AggregateRegistry {
    kinds: HashMap<AggregateOp, Box<dyn AggregateKind>>,
}

impl AggregateRegistry {
    /// Creates a registry without any kind.
    pub fn empty() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Registers (or replaces) the implementation of `op`.
    pub fn register(&mut self, op: AggregateOp, kind: impl AggregateKind + 'static) {
        self.kinds.insert(op, Box::new(kind));
    }

    pub fn get(&self, op: AggregateOp) -> Option<&dyn AggregateKind> {
        self.kinds.get(&op).map(|kind| kind.as_ref())
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl Default for AggregateRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(AggregateOp::Sum, Sum);
        registry.register(AggregateOp::Count, Count);
        registry.register(AggregateOp::Avg, Avg);
        registry.register(AggregateOp::Min, Min);
        registry.register(AggregateOp::Max, Max);
        registry.register(AggregateOp::CountBoolTrue, CountBool(true));
        registry.register(AggregateOp::CountBoolFalse, CountBool(false));
        registry
    }
}

impl fmt::Debug for AggregateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ops: Vec<_> = self.kinds.keys().map(|op| op.keyword()).collect();
        ops.sort_unstable();
        f.debug_struct("AggregateRegistry").field("kinds", &ops).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keywords_round_trip() {
        for op in AggregateOp::all() {
            assert_eq!(AggregateOp::parse(op.keyword()), Some(op));
        }
        assert_eq!(AggregateOp::parse("median"), None);
    }

    #[test]
    fn test_default_registry_has_every_kind() {
        let registry = AggregateRegistry::default();
        assert_eq!(registry.len(), 7);
        for op in AggregateOp::all() {
            assert!(registry.get(op).is_some(), "missing {}", op);
        }
    }

    #[test]
    fn test_state_serializes() {
        let state = Sum.add(Sum.init(), &json!(4));
        let encoded = serde_json::to_value(&state).unwrap();
        assert_eq!(encoded["value"], json!(4));
        let decoded: AggregateState = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, state);
    }
}
