//! Join compiler
//!
//! For every joined store, three procedures keep the local record in sync
//! with the foreign records attached to it:
//!
//! - `insert` splices one foreign record in (replacing an attached record
//!   with the same identity)
//! - `delete` removes one foreign record, matched by identity; no match is
//!   a no-op
//! - `set` rebuilds every attachment from a snapshot of foreign records
//!
//! Aggregates reading an attachment from the same scope or an enclosing one
//! are updated in the same pass with `add`/`remove` deltas against persisted
//! states. External aggregates are maintained the same way.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;

use super::{read_rel, split_path, transform, CompileContext};
use crate::aggregates::{AggregateKind, AggregateOp, AggregateRegistry, AggregateState, AggregateStates};
use crate::observability::Logger;
use crate::schema::{ExternalAggregateDecl, Handler, JoinCardinality, SchemaResult};
use crate::synth::{Cursor, LoopScaffold, Program, ResolvedPath, Scope};

/// Foreign data handed to one join procedure
#[derive(Debug, Clone, Copy)]
pub enum JoinDelta<'r> {
    Record(&'r Value),
    Snapshot(&'r [Value]),
}

/// Run-time collaborators of the join procedures
pub struct JoinContext<'a> {
    pub registry: &'a AggregateRegistry,
    pub constants: &'a Value,
    pub logger: &'a dyn Logger,
    /// Persisted aggregate states of the record being updated
    pub states: &'a mut AggregateStates,
}

pub struct JoinScope<'r> {
    record: &'r mut Value,
    delta: JoinDelta<'r>,
    registry: &'r AggregateRegistry,
    constants: &'r Value,
    logger: &'r dyn Logger,
    states: &'r mut AggregateStates,
}

impl Scope for JoinScope<'_> {
    fn record(&self) -> &Value {
        &*self.record
    }
}

type JoinFragment = Box<dyn for<'r, 'c> Fn(&mut JoinScope<'r>, &Cursor<'c>) + Send + Sync>;

fn fragment<F>(f: F) -> JoinFragment
where
    F: for<'r, 'c> Fn(&mut JoinScope<'r>, &Cursor<'c>) + Send + Sync + 'static,
{
    Box::new(f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Insert,
    Delete,
    Set,
}

/// Two records are the same when their identities are equal; records
/// without identity compare structurally.
fn same_record(a: &Value, b: &Value, identity_key: &str) -> bool {
    let identity = |record: &Value| record.get(identity_key).filter(|id| !id.is_null()).cloned();
    match (identity(a), identity(b)) {
        (Some(x), Some(y)) => x == y,
        (None, None) => a == b,
        _ => false,
    }
}

/// A local aggregate folding values read from an attachment
#[derive(Clone)]
struct InlineAggregate {
    target: String,
    op: AggregateOp,
    /// Loop depth of the element owning the target
    target_depth: usize,
    target_leaf: Vec<String>,
    /// Keys from the target's element down to the attachment, arrays
    /// flattened on the way
    route: Vec<String>,
    /// Path of the folded value inside one foreign record
    source: Vec<String>,
    transformer: Option<Handler>,
}

impl InlineAggregate {
    fn value_of(&self, scope: &JoinScope<'_>, record: &Value) -> Value {
        let raw = read_rel(record, &self.source).cloned().unwrap_or(Value::Null);
        transform(
            "join",
            &self.target,
            self.transformer.as_ref(),
            raw,
            scope.constants,
            scope.logger,
        )
    }

    /// Folds every foreign record attached below the target's element.
    fn seed(&self, scope: &JoinScope<'_>, cursor: &Cursor<'_>, kind: &dyn AggregateKind) -> AggregateState {
        let mut reached: Vec<&Value> = cursor.get_at(scope.record(), self.target_depth, &[]).into_iter().collect();
        for key in &self.route {
            reached = reached
                .into_iter()
                .filter_map(|value| value.get(key.as_str()))
                .flat_map(|value| match value {
                    Value::Array(items) => items.iter().collect::<Vec<_>>(),
                    other => vec![other],
                })
                .collect();
        }
        reached
            .into_iter()
            .filter(|record| record.is_object())
            .fold(kind.init(), |state, record| kind.add(state, &self.value_of(scope, record)))
    }

    /// Applies `removed`/`added` to the persisted state, or rebuilds it from
    /// the attachment when there is none (or `rebuild` is set).
    fn refresh(
        &self,
        scope: &mut JoinScope<'_>,
        cursor: &Cursor<'_>,
        removed: Option<&Value>,
        added: Option<&Value>,
        rebuild: bool,
    ) {
        let registry = scope.registry;
        let kind = match registry.get(self.op) {
            Some(kind) => kind,
            None => return,
        };
        let depth = self.target_depth;
        let pointer = cursor.pointer_at(depth, &self.target_leaf);
        let state = match scope.states.remove(&pointer) {
            Some(mut state) if !rebuild => {
                if let Some(record) = removed {
                    state = kind.remove(state, &self.value_of(scope, record));
                }
                if let Some(record) = added {
                    state = kind.add(state, &self.value_of(scope, record));
                }
                state
            }
            _ => self.seed(scope, cursor, kind),
        };
        cursor.set_at(scope.record, depth, &self.target_leaf, state.value.clone());
        scope.states.insert(pointer, state);
    }
}

/// Insert/delete/set procedures of one joined store
#[derive(Debug)]
pub struct JoinFns {
    store: String,
    insert: Program<JoinFragment>,
    delete: Program<JoinFragment>,
    set: Program<JoinFragment>,
}

struct Scaffolds {
    insert: LoopScaffold<JoinFragment>,
    delete: LoopScaffold<JoinFragment>,
    set: LoopScaffold<JoinFragment>,
}

impl JoinFns {
    /// Compiles the procedures of every joined store.
    pub(crate) fn compile_all(ctx: &CompileContext<'_>) -> SchemaResult<IndexMap<String, JoinFns>> {
        let mut joins = IndexMap::new();
        for store in ctx.meta.joins.keys() {
            joins.insert(store.clone(), Self::compile(ctx, store)?);
        }
        Ok(joins)
    }

    fn compile(ctx: &CompileContext<'_>, store: &str) -> SchemaResult<Self> {
        let mut scaffolds = Scaffolds {
            insert: LoopScaffold::new(format!("{}.joins.{}.insert", ctx.store, store)),
            delete: LoopScaffold::new(format!("{}.joins.{}.delete", ctx.store, store)),
            set: LoopScaffold::new(format!("{}.joins.{}.set", ctx.store, store)),
        };

        for join in ctx.meta.joins.get(store).map(Vec::as_slice).unwrap_or_default() {
            match join.cardinality {
                JoinCardinality::One | JoinCardinality::Many => {
                    let attachment = ctx
                        .resolve_lenient(&join.path)
                        .map_err(|unresolved| ctx.config_error(&join.path, unresolved.to_string()))?;
                    if attachment.is_scalar() {
                        return Err(ctx.config_error(&join.path, "join attachment must be an object or array"));
                    }
                    let inlined = inline_aggregates(ctx, &attachment);
                    add_attachment(ctx, &mut scaffolds, &attachment, join.cardinality, inlined);
                }
                JoinCardinality::Aggregate => {
                    let decl = ctx
                        .meta
                        .external_aggregates
                        .get(store)
                        .and_then(|decls| decls.iter().find(|decl| decl.target == join.path));
                    let decl = match decl {
                        Some(decl) => decl,
                        None => continue,
                    };
                    let target = ctx
                        .resolve_strict(&decl.target)
                        .map_err(|unresolved| ctx.config_error(&decl.target, unresolved.to_string()))?;
                    if !target.is_scalar() {
                        return Err(ctx.config_error(&decl.target, "aggregate target must be a scalar attribute"));
                    }
                    add_external_aggregate(&mut scaffolds, &target, decl);
                }
            }
        }

        let build = |scaffold: LoopScaffold<JoinFragment>, procedure: &str| {
            scaffold
                .synthesize()
                .map_err(|failure| ctx.build_error(procedure, failure))
        };
        Ok(Self {
            store: store.to_string(),
            insert: build(scaffolds.insert, "join insert")?,
            delete: build(scaffolds.delete, "join delete")?,
            set: build(scaffolds.set, "join set")?,
        })
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    fn run(&self, program: &Program<JoinFragment>, object: &mut Value, delta: JoinDelta<'_>, ctx: &mut JoinContext<'_>) {
        let mut scope = JoinScope {
            record: object,
            delta,
            registry: ctx.registry,
            constants: ctx.constants,
            logger: ctx.logger,
            states: &mut *ctx.states,
        };
        program.run(&mut scope);
    }

    /// Attaches `record` wherever this store is joined.
    pub fn insert(&self, object: &mut Value, record: &Value, ctx: &mut JoinContext<'_>) {
        self.run(&self.insert, object, JoinDelta::Record(record), ctx);
    }

    /// Detaches the record with the identity of `record`.
    pub fn delete(&self, object: &mut Value, record: &Value, ctx: &mut JoinContext<'_>) {
        self.run(&self.delete, object, JoinDelta::Record(record), ctx);
    }

    /// Rebuilds every attachment from `snapshot[store]`.
    pub fn set(&self, object: &mut Value, snapshot: &HashMap<String, Vec<Value>>, ctx: &mut JoinContext<'_>) {
        let records = snapshot.get(&self.store).map(Vec::as_slice).unwrap_or_default();
        self.run(&self.set, object, JoinDelta::Snapshot(records), ctx);
    }

    pub fn plans(&self) -> [&str; 3] {
        [self.insert.plan(), self.delete.plan(), self.set.plan()]
    }
}

/// Local aggregates whose source lies in the attachment and whose target
/// sits in the attachment's scope or an enclosing one
fn inline_aggregates(ctx: &CompileContext<'_>, attachment: &ResolvedPath) -> Vec<InlineAggregate> {
    let prefix = format!("{}.", attachment.path);
    let mut inlined = Vec::new();
    for target in &ctx.meta.aggregates_sort {
        let decl = match ctx.meta.aggregates.get(target) {
            Some(decl) => decl,
            None => continue,
        };
        let rest = match decl.source.strip_prefix(&prefix) {
            Some(rest) => rest,
            None => continue,
        };
        let resolved_target = match ctx.resolve_strict(target) {
            Ok(resolved) => resolved,
            Err(_) => continue,
        };
        let target_depth = resolved_target.depth();
        if !resolved_target.is_scalar() || !attachment.loops.starts_with(&resolved_target.loops) {
            continue;
        }
        let route = attachment.loops[target_depth..]
            .iter()
            .flat_map(|spec| spec.access.iter().cloned())
            .chain(attachment.leaf.iter().cloned())
            .collect();
        inlined.push(InlineAggregate {
            target: target.clone(),
            op: decl.op,
            target_depth,
            target_leaf: resolved_target.leaf,
            route,
            source: split_path(rest),
            transformer: decl.transformer.clone(),
        });
    }
    inlined
}

fn add_attachment(
    ctx: &CompileContext<'_>,
    scaffolds: &mut Scaffolds,
    attachment: &ResolvedPath,
    cardinality: JoinCardinality,
    inlined: Vec<InlineAggregate>,
) {
    let identity_key = ctx.config.identity_key.clone();
    let many = cardinality == JoinCardinality::Many;
    let label = |verb: &str| format!("{} {} ({})", verb, attachment.expression(), if many { "many" } else { "one" });

    for mode in [Mode::Insert, Mode::Delete, Mode::Set] {
        let leaf = attachment.leaf.clone();
        let identity_key = identity_key.clone();
        let inlined = inlined.clone();
        let fragment = fragment(move |scope, cursor| {
            let depth = cursor.depth();
            let (removed, added) = {
                let slot = match mode {
                    Mode::Delete => cursor.get_mut(scope.record, &leaf),
                    Mode::Insert | Mode::Set => cursor.slot_mut_at(scope.record, depth, &leaf),
                };
                let slot = match slot {
                    Some(slot) => slot,
                    None => return,
                };
                match (mode, scope.delta) {
                    (Mode::Insert, JoinDelta::Record(incoming)) if many => {
                        if slot.is_null() {
                            *slot = Value::Array(Vec::new());
                        }
                        let list = match slot.as_array_mut() {
                            Some(list) => list,
                            None => return,
                        };
                        match list.iter().position(|r| same_record(r, incoming, &identity_key)) {
                            Some(position) => (
                                Some(std::mem::replace(&mut list[position], incoming.clone())),
                                Some(incoming),
                            ),
                            None => {
                                list.push(incoming.clone());
                                (None, Some(incoming))
                            }
                        }
                    }
                    (Mode::Insert, JoinDelta::Record(incoming)) => {
                        let previous = std::mem::replace(slot, incoming.clone());
                        ((!previous.is_null()).then(|| previous), Some(incoming))
                    }
                    (Mode::Delete, JoinDelta::Record(outgoing)) if many => {
                        let list = match slot.as_array_mut() {
                            Some(list) => list,
                            None => return,
                        };
                        match list.iter().position(|r| same_record(r, outgoing, &identity_key)) {
                            Some(position) => (Some(list.remove(position)), None),
                            None => return,
                        }
                    }
                    (Mode::Delete, JoinDelta::Record(outgoing)) => {
                        if slot.is_null() || !same_record(slot, outgoing, &identity_key) {
                            return;
                        }
                        (Some(std::mem::replace(slot, Value::Null)), None)
                    }
                    (Mode::Set, JoinDelta::Snapshot(records)) => {
                        *slot = if many {
                            Value::Array(records.to_vec())
                        } else {
                            records.first().cloned().unwrap_or(Value::Null)
                        };
                        (None, None)
                    }
                    _ => return,
                }
            };
            for aggregate in &inlined {
                aggregate.refresh(scope, cursor, removed.as_ref(), added, mode == Mode::Set);
            }
        });
        let verb = match mode {
            Mode::Insert => "splice into",
            Mode::Delete => "remove from",
            Mode::Set => "reseed",
        };
        let scaffold = match mode {
            Mode::Insert => &mut scaffolds.insert,
            Mode::Delete => &mut scaffolds.delete,
            Mode::Set => &mut scaffolds.set,
        };
        scaffold.level(&attachment.loops).body(label(verb), fragment);
    }
}

fn add_external_aggregate(scaffolds: &mut Scaffolds, target: &ResolvedPath, decl: &ExternalAggregateDecl) {
    for mode in [Mode::Insert, Mode::Delete, Mode::Set] {
        let label = format!("{} {} of @{}", decl.op, target.expression(), decl.store);
        let decl = decl.clone();
        let leaf = target.leaf.clone();
        let fragment = fragment(move |scope, cursor| {
            let registry = scope.registry;
            let kind = match registry.get(decl.op) {
                Some(kind) => kind,
                None => return,
            };
            let value_of = |scope: &JoinScope<'_>, record: &Value| {
                transform(
                    "join",
                    &decl.target,
                    decl.transformer.as_ref(),
                    decl.source_value(record),
                    scope.constants,
                    scope.logger,
                )
            };
            let depth = cursor.depth();
            let pointer = cursor.pointer_at(depth, &leaf);
            let previous = scope.states.remove(&pointer).unwrap_or_else(|| kind.init());
            let state = match (mode, scope.delta) {
                (Mode::Insert, JoinDelta::Record(record)) => kind.add(previous, &value_of(&*scope, record)),
                (Mode::Delete, JoinDelta::Record(record)) => kind.remove(previous, &value_of(&*scope, record)),
                (Mode::Set, JoinDelta::Snapshot(records)) => records
                    .iter()
                    .fold(kind.init(), |state, record| kind.add(state, &value_of(&*scope, record))),
                _ => previous,
            };
            cursor.set_at(scope.record, depth, &leaf, state.value.clone());
            scope.states.insert(pointer, state);
        });
        let scaffold = match mode {
            Mode::Insert => &mut scaffolds.insert,
            Mode::Delete => &mut scaffolds.delete,
            Mode::Set => &mut scaffolds.set,
        };
        scaffold.level(&target.loops).body(label, fragment);
    }
}
