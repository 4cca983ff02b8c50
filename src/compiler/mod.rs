//! Function compilers
//!
//! Each compiler turns one concern of a flattened store into a pre-bound
//! procedure. Procedures that walk arrays are built on a shared
//! [`LoopScaffold`](crate::synth::LoopScaffold) and run by its evaluator, so
//! the schema is never re-interpreted per record.

mod aggregate;
mod bundle;
mod clone;
mod computed;
mod filter;
mod join;
mod primary_key;
mod reference;
mod registry;

pub use aggregate::{AggregateFn, AggregateScope};
pub use bundle::{analyze, CompiledBundle, Compiler};
pub use clone::CloneFn;
pub use computed::{ComputedFn, ComputedScope};
pub use filter::{FilterDeclaration, FilterFn, FilterOperator, FilterScope, IlikeMatcher, LikeMatcher};
pub use join::{JoinContext, JoinDelta, JoinFns, JoinScope};
pub use primary_key::PrimaryKeyFns;
pub use reference::{KeyFn, ReferenceFns};
pub use registry::StoreRegistry;

use serde_json::Value;

use crate::config::CompilerConfig;
use crate::observability::Logger;
use crate::schema::{Handler, Metadata, NodeMap, SchemaError, TransformerError};
use crate::synth::{BuildFailure, PathResolver, ResolvedPath, Unresolved};

/// Borrowed view of one store's flattened graph
#[derive(Clone, Copy)]
pub(crate) struct CompileContext<'a> {
    pub store: &'a str,
    pub root: &'a str,
    pub nodes: &'a NodeMap,
    pub virtual_nodes: &'a NodeMap,
    pub meta: &'a Metadata,
    pub config: &'a CompilerConfig,
}

impl<'a> CompileContext<'a> {
    /// Resolves against declared nodes only.
    pub fn resolve_strict(&self, path: &str) -> Result<ResolvedPath, Unresolved> {
        PathResolver::new(self.nodes, self.root).resolve(path)
    }

    /// Resolves against declared nodes, then through join attachments.
    pub fn resolve_lenient(&self, path: &str) -> Result<ResolvedPath, Unresolved> {
        self.resolve_strict(path).or_else(|_| {
            PathResolver::new(self.nodes, self.root)
                .with_virtual(self.virtual_nodes)
                .resolve(path)
        })
    }

    pub fn config_error(&self, attribute: &str, rule: impl Into<String>) -> SchemaError {
        SchemaError::configuration(self.store, attribute, rule)
    }

    pub fn build_error(&self, procedure: &str, failure: BuildFailure) -> SchemaError {
        SchemaError::build_failed(self.store, procedure, failure.cause, failure.plan)
    }
}

/// Runs an optional user transformer. Failures are logged and give null.
pub(crate) fn transform(
    procedure: &'static str,
    attribute: &str,
    transformer: Option<&Handler>,
    value: Value,
    constants: &Value,
    logger: &dyn Logger,
) -> Value {
    match transformer {
        None => value,
        Some(handler) => match handler.call(&value, constants) {
            Ok(value) => value,
            Err(message) => {
                logger.warn(
                    &[procedure, attribute],
                    &TransformerError::new(procedure, attribute, message),
                );
                Value::Null
            }
        },
    }
}

/// Reads a dotted relative path out of a value.
pub(crate) fn read_rel<'v>(value: &'v Value, rel: &[String]) -> Option<&'v Value> {
    rel.iter().try_fold(value, |value, key| value.get(key.as_str()))
}

pub(crate) fn split_path(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}
