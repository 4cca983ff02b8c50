//! Store registry
//!
//! Holds one immutable [`CompiledBundle`] per store name. Bundles are
//! shared behind `Arc` so collection runtimes can keep them across threads.

use std::sync::Arc;

use indexmap::IndexMap;

use super::bundle::{CompiledBundle, Compiler};
use crate::schema::{Descriptor, SchemaError, SchemaResult};

/// Compiled stores indexed by name, in registration order
#[derive(Debug, Default)]
pub struct StoreRegistry {
    compiler: Compiler,
    bundles: IndexMap<String, Arc<CompiledBundle>>,
}

impl StoreRegistry {
    pub fn new(compiler: Compiler) -> Self {
        Self {
            compiler,
            bundles: IndexMap::new(),
        }
    }

    /// Compiles `descriptor` and registers it as `store`.
    ///
    /// # Errors
    ///
    /// `AlreadyRegistered` when `store` is taken, otherwise whatever the
    /// compilation reports. A failed registration leaves the registry as it
    /// was.
    pub fn register(&mut self, store: &str, descriptor: &Descriptor) -> SchemaResult<Arc<CompiledBundle>> {
        if self.bundles.contains_key(store) {
            return Err(SchemaError::already_registered(store));
        }
        let bundle = Arc::new(self.compiler.analyze(descriptor, store)?);
        self.bundles.insert(store.to_string(), Arc::clone(&bundle));
        Ok(bundle)
    }

    pub fn get(&self, store: &str) -> Option<Arc<CompiledBundle>> {
        self.bundles.get(store).cloned()
    }

    pub fn exists(&self, store: &str) -> bool {
        self.bundles.contains_key(store)
    }

    pub fn store_count(&self) -> usize {
        self.bundles.len()
    }

    /// Registered store names, in registration order
    pub fn stores(&self) -> impl Iterator<Item = &str> {
        self.bundles.keys().map(String::as_str)
    }

    /// Stores joining `store`, i.e. those whose records must be updated when
    /// a `store` record changes
    pub fn dependents_of<'a>(&'a self, store: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.bundles
            .iter()
            .filter(move |(_, bundle)| bundle.meta.is_joined(store))
            .map(|(name, _)| name.as_str())
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }
}
