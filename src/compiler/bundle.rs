//! Compiled bundle and the compiler entry point
//!
//! `analyze` flattens a descriptor once and runs every function compiler
//! over the result. The bundle is immutable; procedures that maintain
//! aggregate state receive that state from the caller.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use super::aggregate::AggregateFn;
use super::clone::CloneFn;
use super::computed::ComputedFn;
use super::filter::{FilterDeclaration, FilterFn};
use super::join::{JoinContext, JoinFns};
use super::primary_key::PrimaryKeyFns;
use super::reference::{KeyFn, ReferenceFns};
use super::CompileContext;
use crate::aggregates::AggregateRegistry;
use crate::config::CompilerConfig;
use crate::observability::{JsonLogger, Logger, Severity};
use crate::schema::{
    Descriptor, Flattener, Hook, Metadata, NodeMap, RecordTransformer, RecordValidator, SchemaResult,
};

/// Everything compiled for one store
#[derive(Debug)]
pub struct CompiledBundle {
    pub store_name: String,
    pub meta: Metadata,
    pub on_validate: IndexMap<String, Hook>,
    pub on_transform: IndexMap<String, Hook>,
    pub compilation: NodeMap,
    pub virtual_compilation: NodeMap,
    /// Unique name of the root node
    pub root: String,
    pub default_value: Value,
    config: CompilerConfig,
    primary_key: PrimaryKeyFns,
    aggregate: AggregateFn,
    computeds: ComputedFn,
    /// Reference procedures by referenced store
    references: IndexMap<String, ReferenceFns>,
    joins: IndexMap<String, JoinFns>,
    clone: CloneFn,
    transformer: RecordTransformer,
    validator: RecordValidator,
}

impl CompiledBundle {
    fn context(&self) -> CompileContext<'_> {
        CompileContext {
            store: &self.store_name,
            root: &self.root,
            nodes: &self.compilation,
            virtual_nodes: &self.virtual_compilation,
            meta: &self.meta,
            config: &self.config,
        }
    }

    pub fn get_primary_key(&self, record: &Value) -> Option<Value> {
        self.primary_key.get(record)
    }

    pub fn set_primary_key(&self, record: &mut Value, key: &Value) -> bool {
        self.primary_key.set(record, key)
    }

    pub fn primary_key(&self) -> &PrimaryKeyFns {
        &self.primary_key
    }

    /// Recomputes the local aggregates of `object`.
    pub fn aggregate(&self, object: &mut Value, registry: &AggregateRegistry, constants: &Value, logger: &dyn Logger) {
        self.aggregate.apply(object, registry, constants, logger);
    }

    pub fn aggregate_fn(&self) -> &AggregateFn {
        &self.aggregate
    }

    /// Evaluates the computed fields of `object`.
    pub fn computeds(&self, object: &mut Value, constants: &Value, logger: &dyn Logger) {
        self.computeds.apply(object, constants, logger);
    }

    pub fn computeds_fn(&self) -> &ComputedFn {
        &self.computeds
    }

    /// Reference procedures for the copies of `store` records
    pub fn references(&self, store: &str) -> Option<&ReferenceFns> {
        self.references.get(store)
    }

    pub fn references_fn(&self) -> impl Iterator<Item = &ReferenceFns> {
        self.references.values()
    }

    /// Keys of every `store` record referenced by `object`
    pub fn referenced_keys(&self, store: &str, key_fn: Option<KeyFn<'_>>, object: &Value) -> Vec<Value> {
        self.references(store)
            .map(|references| references.get(key_fn, object))
            .unwrap_or_default()
    }

    /// Join procedures for the records of `store`
    pub fn joins(&self, store: &str) -> Option<&JoinFns> {
        self.joins.get(store)
    }

    pub fn joins_fn(&self) -> impl Iterator<Item = &JoinFns> {
        self.joins.values()
    }

    /// Applies one inserted foreign record. Returns false when `store` is
    /// not joined.
    pub fn join_insert(&self, store: &str, object: &mut Value, record: &Value, ctx: &mut JoinContext<'_>) -> bool {
        match self.joins(store) {
            Some(joins) => {
                joins.insert(object, record, ctx);
                true
            }
            None => false,
        }
    }

    pub fn join_delete(&self, store: &str, object: &mut Value, record: &Value, ctx: &mut JoinContext<'_>) -> bool {
        match self.joins(store) {
            Some(joins) => {
                joins.delete(object, record, ctx);
                true
            }
            None => false,
        }
    }

    /// Rebuilds every attachment of every joined store from `snapshot`.
    pub fn join_set(&self, object: &mut Value, snapshot: &HashMap<String, Vec<Value>>, ctx: &mut JoinContext<'_>) {
        for joins in self.joins.values() {
            joins.set(object, snapshot, ctx);
        }
    }

    /// Deep-clones a record or a list of records.
    pub fn clone_value(&self, input: &Value) -> Value {
        self.clone.apply(input)
    }

    /// Compiles a filter predicate against this store.
    pub fn filter(&self, declaration: &FilterDeclaration) -> SchemaResult<FilterFn> {
        FilterFn::compile(&self.context(), declaration)
    }

    /// Applies conversions and onTransform hooks to a record before it is
    /// validated and stored.
    pub fn apply_transforms(&self, record: &mut Value, logger: &dyn Logger) {
        self.transformer.apply(record, logger);
    }

    /// Checks `record` against the compilation.
    pub fn validate(&self, record: &Value) -> SchemaResult<()> {
        self.validator.validate(record)
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Rendered plans of every synthesized procedure, by procedure name
    pub fn plans(&self) -> Vec<(String, String)> {
        let mut plans = vec![
            ("aggregate".to_string(), self.aggregate.plan().to_string()),
            ("computeds".to_string(), self.computeds.plan().to_string()),
        ];
        for (store, joins) in &self.joins {
            for (verb, plan) in ["insert", "delete", "set"].iter().zip(joins.plans()) {
                plans.push((format!("joins.{}.{}", store, verb), plan.to_string()));
            }
        }
        for (store, references) in &self.references {
            for (verb, plan) in ["get", "update"].iter().zip(references.plans()) {
                plans.push((format!("references.{}.{}", store, verb), plan.to_string()));
            }
        }
        plans
    }
}

/// Compiles descriptors into bundles
#[derive(Clone)]
pub struct Compiler {
    config: CompilerConfig,
    logger: Arc<dyn Logger>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(CompilerConfig::default())
    }
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self {
            config,
            logger: Arc::new(JsonLogger::default()),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn logger(&self) -> &dyn Logger {
        self.logger.as_ref()
    }

    /// Flattens `descriptor` and compiles every procedure of `store`.
    pub fn analyze(&self, descriptor: &Descriptor, store: &str) -> SchemaResult<CompiledBundle> {
        let flattened = Flattener::new(store, &self.config.root_name, self.logger()).flatten(descriptor)?;
        let validator = RecordValidator::new(store, &flattened);
        let transformer = RecordTransformer::new(&flattened);

        let ctx = CompileContext {
            store,
            root: &flattened.root,
            nodes: &flattened.nodes,
            virtual_nodes: &flattened.virtual_nodes,
            meta: &flattened.meta,
            config: &self.config,
        };
        let primary_key = PrimaryKeyFns::compile(&ctx)?;
        let aggregate = AggregateFn::compile(&ctx)?;
        let computeds = ComputedFn::compile(&ctx)?;
        let mut references = IndexMap::new();
        for (path, referenced) in &flattened.meta.references {
            references.insert(referenced.clone(), ReferenceFns::compile(&ctx, path, referenced)?);
        }
        let joins = JoinFns::compile_all(&ctx)?;
        let clone = CloneFn::compile(&ctx)?;

        let bundle = CompiledBundle {
            store_name: store.to_string(),
            meta: flattened.meta,
            on_validate: flattened.on_validate,
            on_transform: flattened.on_transform,
            compilation: flattened.nodes,
            virtual_compilation: flattened.virtual_nodes,
            root: flattened.root,
            default_value: flattened.default_value,
            config: self.config.clone(),
            primary_key,
            aggregate,
            computeds,
            references,
            joins,
            clone,
            transformer,
            validator,
        };
        if self.config.log_compilation {
            self.log_compiled(&bundle);
        }
        Ok(bundle)
    }

    fn log_compiled(&self, bundle: &CompiledBundle) {
        let nodes = bundle.compilation.len().to_string();
        let aggregates = bundle.meta.aggregates.len().to_string();
        let joins = bundle.joins.len().to_string();
        self.logger.event(
            Severity::Info,
            "STORE_COMPILED",
            &[
                ("store", &bundle.store_name),
                ("nodes", &nodes),
                ("aggregates", &aggregates),
                ("joins", &joins),
            ],
        );
        for (procedure, plan) in bundle.plans() {
            self.logger.event(
                Severity::Trace,
                "PROCEDURE_PLAN",
                &[("store", &bundle.store_name), ("procedure", &procedure), ("plan", &plan)],
            );
        }
    }
}

/// Compiles `descriptor` with the default configuration.
pub fn analyze(descriptor: &Descriptor, store: &str) -> SchemaResult<CompiledBundle> {
    Compiler::default().analyze(descriptor, store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::MemoryLogger;
    use serde_json::json;

    fn menu() -> Descriptor {
        Descriptor::from_json(&json!({
            "id": ["int", "<<idMenu>>"],
            "label": ["string", "<labelMenu>"],
            "dishes": ["array", { "id": ["int", "<<idDish>>"] }]
        }))
        .unwrap()
    }

    #[test]
    fn test_bundle_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledBundle>();
        assert_send_sync::<Compiler>();
    }

    #[test]
    fn test_compilation_is_logged_when_enabled() {
        let logger = Arc::new(MemoryLogger::new());
        let compiler = Compiler::new(CompilerConfig::default().with_log_compilation(true)).with_logger(logger.clone());
        compiler.analyze(&menu(), "menu").unwrap();

        let entries = logger.entries();
        assert_eq!(entries[0].event, "STORE_COMPILED");
        assert!(entries[0].labels.contains(&"store=menu".to_string()));
        assert!(entries.iter().any(|entry| entry.event == "PROCEDURE_PLAN"));
    }

    #[test]
    fn test_compilation_is_quiet_by_default() {
        let logger = Arc::new(MemoryLogger::new());
        Compiler::default().with_logger(logger.clone()).analyze(&menu(), "menu").unwrap();
        assert!(logger.entries().is_empty());
    }

    #[test]
    fn test_custom_root_name() {
        let compiler = Compiler::new(CompilerConfig::default().with_root_name("record"));
        let bundle = compiler.analyze(&menu(), "menu").unwrap();
        assert_eq!(bundle.root, "record0");
        assert!(bundle.compilation.contains_key("dishes1"));
    }
}
