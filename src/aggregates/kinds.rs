//! Built-in aggregate kinds

use serde_json::Value;

use super::{AggregateKind, AggregateState};
use crate::schema::number_value;

/// Numeric reading of a folded value. Numeric strings count as numbers.
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Sum of numeric values, 0 when empty
#[derive(Debug, Clone, Copy, Default)]
pub struct Sum;

impl AggregateKind for Sum {
    fn start_value(&self) -> Value {
        Value::from(0)
    }

    fn add(&self, mut state: AggregateState, value: &Value) -> AggregateState {
        if let Some(n) = numeric(value) {
            state.sum += n;
            state.count += 1;
        }
        state.value = number_value(state.sum);
        state
    }

    fn remove(&self, mut state: AggregateState, value: &Value) -> AggregateState {
        if let Some(n) = numeric(value) {
            state.sum -= n;
            state.count = state.count.saturating_sub(1);
        }
        if state.count == 0 {
            state.sum = 0.0;
        }
        state.value = number_value(state.sum);
        state
    }
}

/// Number of non-null values
#[derive(Debug, Clone, Copy, Default)]
pub struct Count;

impl AggregateKind for Count {
    fn start_value(&self) -> Value {
        Value::from(0)
    }

    fn add(&self, mut state: AggregateState, value: &Value) -> AggregateState {
        if !value.is_null() {
            state.count += 1;
        }
        state.value = Value::from(state.count);
        state
    }

    fn remove(&self, mut state: AggregateState, value: &Value) -> AggregateState {
        if !value.is_null() {
            state.count = state.count.saturating_sub(1);
        }
        state.value = Value::from(state.count);
        state
    }
}

/// Arithmetic mean of numeric values, 0 when empty
#[derive(Debug, Clone, Copy, Default)]
pub struct Avg;

impl Avg {
    fn settle(mut state: AggregateState) -> AggregateState {
        if state.count == 0 {
            state.sum = 0.0;
            state.value = Value::from(0);
        } else {
            state.value = number_value(state.sum / state.count as f64);
        }
        state
    }
}

impl AggregateKind for Avg {
    fn start_value(&self) -> Value {
        Value::from(0)
    }

    fn add(&self, mut state: AggregateState, value: &Value) -> AggregateState {
        if let Some(n) = numeric(value) {
            state.sum += n;
            state.count += 1;
        }
        Self::settle(state)
    }

    fn remove(&self, mut state: AggregateState, value: &Value) -> AggregateState {
        if let Some(n) = numeric(value) {
            state.sum -= n;
            state.count = state.count.saturating_sub(1);
        }
        Self::settle(state)
    }
}

fn insert_sorted(values: &mut Vec<f64>, n: f64) {
    let position = values.partition_point(|v| *v < n);
    values.insert(position, n);
}

fn remove_one(values: &mut Vec<f64>, n: f64) {
    if let Some(position) = values.iter().position(|v| *v == n) {
        values.remove(position);
    }
}

/// Smallest numeric value, null when empty
#[derive(Debug, Clone, Copy, Default)]
pub struct Min;

impl AggregateKind for Min {
    fn start_value(&self) -> Value {
        Value::Null
    }

    fn add(&self, mut state: AggregateState, value: &Value) -> AggregateState {
        if let Some(n) = numeric(value) {
            insert_sorted(&mut state.values, n);
            state.count += 1;
        }
        state.value = state.values.first().map_or(Value::Null, |n| number_value(*n));
        state
    }

    fn remove(&self, mut state: AggregateState, value: &Value) -> AggregateState {
        if let Some(n) = numeric(value) {
            remove_one(&mut state.values, n);
            state.count = state.count.saturating_sub(1);
        }
        state.value = state.values.first().map_or(Value::Null, |n| number_value(*n));
        state
    }
}

/// Largest numeric value, null when empty
#[derive(Debug, Clone, Copy, Default)]
pub struct Max;

impl AggregateKind for Max {
    fn start_value(&self) -> Value {
        Value::Null
    }

    fn add(&self, mut state: AggregateState, value: &Value) -> AggregateState {
        if let Some(n) = numeric(value) {
            insert_sorted(&mut state.values, n);
            state.count += 1;
        }
        state.value = state.values.last().map_or(Value::Null, |n| number_value(*n));
        state
    }

    fn remove(&self, mut state: AggregateState, value: &Value) -> AggregateState {
        if let Some(n) = numeric(value) {
            remove_one(&mut state.values, n);
            state.count = state.count.saturating_sub(1);
        }
        state.value = state.values.last().map_or(Value::Null, |n| number_value(*n));
        state
    }
}

/// Number of values strictly equal to the wrapped boolean
#[derive(Debug, Clone, Copy)]
pub struct CountBool(pub bool);

impl AggregateKind for CountBool {
    fn start_value(&self) -> Value {
        Value::from(0)
    }

    fn add(&self, mut state: AggregateState, value: &Value) -> AggregateState {
        if value.as_bool() == Some(self.0) {
            state.count += 1;
        }
        state.value = Value::from(state.count);
        state
    }

    fn remove(&self, mut state: AggregateState, value: &Value) -> AggregateState {
        if value.as_bool() == Some(self.0) {
            state.count = state.count.saturating_sub(1);
        }
        state.value = Value::from(state.count);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregates::{AggregateOp, AggregateRegistry};
    use serde_json::json;

    fn fold(kind: &dyn AggregateKind, values: &[Value]) -> AggregateState {
        values
            .iter()
            .fold(kind.init(), |state, value| kind.add(state, value))
    }

    #[test]
    fn test_add_remove_symmetry_for_every_kind() {
        let registry = AggregateRegistry::default();
        let samples = [json!(3), json!(0.1), json!(-7.5), json!("12"), json!(true), json!(false), Value::Null];

        for op in AggregateOp::all() {
            let kind = registry.get(op).unwrap();
            for sample in &samples {
                let start = kind.init();
                let restored = kind.remove(kind.add(kind.init(), sample), sample);
                assert_eq!(restored.value, start.value, "{} with {}", op, sample);
            }
        }
    }

    #[test]
    fn test_sum_and_avg() {
        let state = fold(&Sum, &[json!(1), json!(2), json!(3.5)]);
        assert_eq!(state.value, json!(6.5));

        let state = fold(&Avg, &[json!(2), json!(4)]);
        assert_eq!(state.value, json!(3));
        assert_eq!(Avg.remove(state, &json!(4)).value, json!(2));
    }

    #[test]
    fn test_sum_ignores_non_numeric() {
        let state = fold(&Sum, &[json!(1), json!("abc"), Value::Null]);
        assert_eq!(state.value, json!(1));
    }

    #[test]
    fn test_min_max_survive_removal_of_extreme() {
        let state = fold(&Min, &[json!(5), json!(1), json!(3)]);
        assert_eq!(state.value, json!(1));
        assert_eq!(Min.remove(state, &json!(1)).value, json!(3));

        let state = fold(&Max, &[json!(5), json!(1), json!(5)]);
        let state = Max.remove(state, &json!(5));
        assert_eq!(state.value, json!(5));
        assert_eq!(Max.remove(state, &json!(5)).value, json!(1));
    }

    #[test]
    fn test_count_kinds() {
        let state = fold(&Count, &[json!(1), Value::Null, json!("x")]);
        assert_eq!(state.value, json!(2));

        let state = fold(&CountBool(true), &[json!(true), json!(false), json!(true)]);
        assert_eq!(state.value, json!(2));
        let state = fold(&CountBool(false), &[json!(true), json!(false)]);
        assert_eq!(state.value, json!(1));
    }
}
