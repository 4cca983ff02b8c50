//! Aggregate compiler
//!
//! Every local aggregate contributes two fragments to one shared scaffold:
//!
//! - a reset, run before the first loop the source crosses below the
//!   target, writing the kind's start value (so an empty or absent array
//!   leaves the target at its start value)
//! - a fold, run per source element, adding the (optionally transformed)
//!   value to a running state and writing `state.value` to the target
//!
//! Aggregates fed by other stores are maintained by the join procedures.

use std::collections::HashMap;

use serde_json::Value;

use super::{transform, CompileContext};
use crate::aggregates::{AggregateRegistry, AggregateState};
use crate::observability::Logger;
use crate::schema::{Handler, SchemaResult};
use crate::synth::{Cursor, LoopScaffold, Program, Scope};

/// State of one run of [`AggregateFn`]
pub struct AggregateScope<'r> {
    record: &'r mut Value,
    registry: &'r AggregateRegistry,
    constants: &'r Value,
    logger: &'r dyn Logger,
    /// Running state per aggregate, reset per enclosing element
    slots: HashMap<usize, AggregateState>,
}

impl Scope for AggregateScope<'_> {
    fn record(&self) -> &Value {
        &*self.record
    }
}

type AggregateFragment = Box<dyn for<'r, 'c> Fn(&mut AggregateScope<'r>, &Cursor<'c>) + Send + Sync>;

fn fragment<F>(f: F) -> AggregateFragment
where
    F: for<'r, 'c> Fn(&mut AggregateScope<'r>, &Cursor<'c>) + Send + Sync + 'static,
{
    Box::new(f)
}

/// Recomputes every local aggregate of a record
#[derive(Debug)]
pub struct AggregateFn {
    program: Program<AggregateFragment>,
}

impl AggregateFn {
    pub(crate) fn compile(ctx: &CompileContext<'_>) -> SchemaResult<Self> {
        let mut scaffold = LoopScaffold::new(format!("{}.aggregate", ctx.store));

        for (slot, target) in ctx.meta.aggregates_sort.iter().enumerate() {
            let decl = match ctx.meta.aggregates.get(target) {
                Some(decl) => decl,
                None => continue,
            };
            let resolved_target = ctx
                .resolve_strict(target)
                .map_err(|unresolved| ctx.config_error(target, unresolved.to_string()))?;
            if !resolved_target.is_scalar() {
                return Err(ctx.config_error(target, "aggregate target must be a scalar attribute"));
            }
            let source = ctx
                .resolve_lenient(&decl.source)
                .map_err(|unresolved| ctx.config_error(target, unresolved.to_string()))?;
            if !source.is_scalar() {
                return Err(ctx.config_error(
                    target,
                    format!("aggregate source '{}' must be a scalar attribute", decl.source),
                ));
            }

            let depth = resolved_target.depth();
            if source.depth() < depth || source.loops[..depth] != resolved_target.loops[..] {
                return Err(ctx.config_error(
                    target,
                    format!("aggregate source '{}' is outside the scope of its target", decl.source),
                ));
            }

            let op = decl.op;
            let target_leaf = resolved_target.leaf.clone();
            let reset = fragment({
                let target_leaf = target_leaf.clone();
                move |scope, cursor| {
                    let state = scope
                        .registry
                        .get(op)
                        .map(|kind| kind.init())
                        .unwrap_or_default();
                    let value = state.value.clone();
                    scope.slots.insert(slot, state);
                    cursor.set_at(scope.record, depth, &target_leaf, value);
                }
            });
            let reset_label = format!("reset {} to start of {}", resolved_target.expression(), op);
            if source.depth() > depth {
                scaffold.level(&source.loops[..depth + 1]).pre(reset_label, reset);
            } else {
                scaffold.level(&source.loops).body(reset_label, reset);
            }

            let source_leaf = source.leaf.clone();
            let transformer: Option<Handler> = decl.transformer.clone();
            let attribute = target.clone();
            let fold = fragment(move |scope, cursor| {
                let raw = cursor
                    .get(scope.record, &source_leaf)
                    .cloned()
                    .unwrap_or(Value::Null);
                let value = transform(
                    "aggregate",
                    &attribute,
                    transformer.as_ref(),
                    raw,
                    scope.constants,
                    scope.logger,
                );
                let registry = scope.registry;
                let kind = match registry.get(op) {
                    Some(kind) => kind,
                    None => {
                        scope.logger.warn(
                            &["aggregate", attribute.as_str()],
                            &format!("aggregate kind '{}' is not registered", op),
                        );
                        return;
                    }
                };
                let state = scope.slots.remove(&slot).unwrap_or_else(|| kind.init());
                let state = kind.add(state, &value);
                let current = state.value.clone();
                scope.slots.insert(slot, state);
                cursor.set_at(scope.record, depth, &target_leaf, current);
            });
            scaffold.level(&source.loops).body(
                format!("fold {} into {} ({})", source.expression(), resolved_target.expression(), op),
                fold,
            );
        }

        let program = scaffold
            .synthesize()
            .map_err(|failure| ctx.build_error("aggregate", failure))?;
        Ok(Self { program })
    }

    /// Recomputes every local aggregate of `object` in place.
    pub fn apply(&self, object: &mut Value, registry: &AggregateRegistry, constants: &Value, logger: &dyn Logger) {
        let mut scope = AggregateScope {
            record: object,
            registry,
            constants,
            logger,
            slots: HashMap::new(),
        };
        self.program.run(&mut scope);
    }

    /// Rendered plan of the procedure
    pub fn plan(&self) -> &str {
        self.program.plan()
    }

    pub fn is_empty(&self) -> bool {
        self.program.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::aggregates::AggregateRegistry;
    use crate::compiler::analyze;
    use crate::observability::MemoryLogger;
    use crate::schema::{Descriptor, Directive};
    use serde_json::{json, Value};

    #[test]
    fn test_nested_sum_and_count() {
        let bundle = analyze(
            &Descriptor::from_json(&json!({
                "id": ["int", "<<id>>"],
                "carts": ["array", {
                    "id": ["int", "<<cartId>>"],
                    "total": ["number", "sum", "items.price"],
                    "items": ["array", { "sku": ["string", "<<sku>>"], "price": ["number"] }]
                }],
                "cartCount": ["int", "count", "carts.id"],
                "grandTotal": ["number", "sum", "carts.total"]
            }))
            .unwrap(),
            "customer",
        )
        .unwrap();

        let mut record = json!({
            "id": 1,
            "carts": [
                { "id": 1, "items": [{ "sku": "a", "price": 2 }, { "sku": "b", "price": 3.5 }] },
                { "id": 2, "items": [] },
                { "id": 3 }
            ]
        });
        bundle.aggregate(&mut record, &AggregateRegistry::default(), &Value::Null, &MemoryLogger::new());

        assert_eq!(record["carts"][0]["total"], json!(5.5));
        assert_eq!(record["carts"][1]["total"], json!(0));
        assert_eq!(record["carts"][2]["total"], json!(0));
        assert_eq!(record["cartCount"], json!(3));
        assert_eq!(record["grandTotal"], json!(5.5));
    }

    #[test]
    fn test_failed_transformer_degrades_to_null() {
        let descriptor = Descriptor::new()
            .field("id", vec!["int".into(), "<<id>>".into()])
            .field(
                "lines",
                vec![
                    "array".into(),
                    Descriptor::new()
                        .field("n", vec!["int".into(), "<<n>>".into()])
                        .field("qty", vec!["int".into()])
                        .into(),
                ],
            )
            .field(
                "total",
                vec![
                    "number".into(),
                    "sum".into(),
                    "lines.qty".into(),
                    Directive::handler(|value, _| match value.as_i64() {
                        Some(n) if n >= 0 => Ok(json!(n * 10)),
                        _ => Err("negative quantity".into()),
                    }),
                ],
            );
        let bundle = crate::compiler::analyze(&descriptor, "order").unwrap();
        let logger = MemoryLogger::new();
        let mut record = json!({ "id": 1, "lines": [{ "n": 1, "qty": 2 }, { "n": 2, "qty": -1 }, { "n": 3, "qty": 1 }] });
        bundle.aggregate(&mut record, &AggregateRegistry::default(), &Value::Null, &logger);

        assert_eq!(record["total"], json!(30));
        let warnings = logger.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].labels, vec!["aggregate", "total"]);
        assert!(warnings[0].message.contains("negative quantity"));
    }

    #[test]
    fn test_source_outside_target_scope_fails() {
        let err = analyze(
            &Descriptor::from_json(&json!({
                "id": ["int", "<<id>>"],
                "a": ["array", { "id": ["int", "<<aid>>"], "total": ["number", "sum", "b.price"] }],
                "b": ["array", { "id": ["int", "<<bid>>"], "price": ["number"] }]
            }))
            .unwrap(),
            "s",
        )
        .unwrap_err();
        assert_eq!(err.attribute(), Some("a.total"));
    }
}
