//! Reference compiler
//!
//! A reference embeds a copy of another store's record (`ref @store`).
//! `get` collects the keys of every embedded copy; `update` overwrites the
//! copies of one record after it changed in its own store.

use serde_json::Value;

use super::CompileContext;
use crate::schema::SchemaResult;
use crate::synth::{Cursor, LoopScaffold, Program, Scope};

/// Primary-key function of the referenced store
pub type KeyFn<'a> = &'a dyn Fn(&Value) -> Option<Value>;

pub struct GetScope<'r> {
    record: &'r Value,
    key_fn: KeyFn<'r>,
    keys: Vec<Value>,
}

impl Scope for GetScope<'_> {
    fn record(&self) -> &Value {
        self.record
    }
}

pub struct UpdateScope<'r> {
    record: &'r mut Value,
    key_fn: KeyFn<'r>,
    parent: &'r Value,
    parent_key: Option<Value>,
    identity_key: &'r str,
    updated: usize,
}

impl Scope for UpdateScope<'_> {
    fn record(&self) -> &Value {
        &*self.record
    }
}

type GetFragment = Box<dyn for<'r, 'c> Fn(&mut GetScope<'r>, &Cursor<'c>) + Send + Sync>;
type UpdateFragment = Box<dyn for<'r, 'c> Fn(&mut UpdateScope<'r>, &Cursor<'c>) + Send + Sync>;

fn get_fragment<F>(f: F) -> GetFragment
where
    F: for<'r, 'c> Fn(&mut GetScope<'r>, &Cursor<'c>) + Send + Sync + 'static,
{
    Box::new(f)
}

fn update_fragment<F>(f: F) -> UpdateFragment
where
    F: for<'r, 'c> Fn(&mut UpdateScope<'r>, &Cursor<'c>) + Send + Sync + 'static,
{
    Box::new(f)
}

/// `get`/`update` procedures of one reference
#[derive(Debug)]
pub struct ReferenceFns {
    path: String,
    store: String,
    identity_key: String,
    get: Program<GetFragment>,
    update: Program<UpdateFragment>,
}

impl ReferenceFns {
    pub(crate) fn compile(ctx: &CompileContext<'_>, path: &str, store: &str) -> SchemaResult<Self> {
        let resolved = ctx
            .resolve_strict(path)
            .map_err(|unresolved| ctx.config_error(path, unresolved.to_string()))?;
        if resolved.is_scalar() {
            return Err(ctx.config_error(
                path,
                format!("reference to @{} must be an object or array", store),
            ));
        }
        let (loops, leaf) = resolved.element_loops();

        let mut get = LoopScaffold::new(format!("{}.references.{}.get", ctx.store, path));
        let read_leaf = leaf.clone();
        get.level(&loops).body(
            format!("collect key of {}", resolved.expression()),
            get_fragment(move |scope, cursor| {
                let embedded = match cursor.get(scope.record, &read_leaf) {
                    Some(embedded) if embedded.is_object() => embedded,
                    _ => return,
                };
                if let Some(key) = (scope.key_fn)(embedded) {
                    if !key.is_null() && !scope.keys.contains(&key) {
                        scope.keys.push(key);
                    }
                }
            }),
        );

        let mut update = LoopScaffold::new(format!("{}.references.{}.update", ctx.store, path));
        update.level(&loops).body(
            format!("overwrite {} when it matches", resolved.expression()),
            update_fragment(move |scope, cursor| {
                let depth = cursor.depth();
                let matches = match cursor.get(&*scope.record, &leaf) {
                    Some(embedded) if embedded.is_object() => is_same(scope, embedded),
                    _ => false,
                };
                if matches && cursor.set_at(scope.record, depth, &leaf, scope.parent.clone()) {
                    scope.updated += 1;
                }
            }),
        );

        Ok(Self {
            path: path.to_string(),
            store: store.to_string(),
            identity_key: ctx.config.identity_key.clone(),
            get: get.synthesize().map_err(|failure| ctx.build_error("references get", failure))?,
            update: update
                .synthesize()
                .map_err(|failure| ctx.build_error("references update", failure))?,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Referenced store
    pub fn store(&self) -> &str {
        &self.store
    }

    /// Unique keys of the records embedded in `object`, in encounter order.
    /// Without a key function nothing can be collected.
    pub fn get(&self, key_fn: Option<KeyFn<'_>>, object: &Value) -> Vec<Value> {
        let key_fn = match key_fn {
            Some(key_fn) => key_fn,
            None => return Vec::new(),
        };
        let mut scope = GetScope {
            record: object,
            key_fn,
            keys: Vec::new(),
        };
        self.get.run(&mut scope);
        scope.keys
    }

    /// Replaces every embedded copy of `parent` in `object` and returns how
    /// many were replaced.
    pub fn update(&self, key_fn: Option<KeyFn<'_>>, parent: &Value, object: &mut Value) -> usize {
        let no_key = |_: &Value| -> Option<Value> { None };
        let key_fn: KeyFn<'_> = key_fn.unwrap_or(&no_key);
        let mut scope = UpdateScope {
            record: object,
            key_fn,
            parent,
            parent_key: key_fn(parent).filter(|key| !key.is_null()),
            identity_key: &self.identity_key,
            updated: 0,
        };
        self.update.run(&mut scope);
        scope.updated
    }

    pub fn plans(&self) -> [&str; 2] {
        [self.get.plan(), self.update.plan()]
    }
}

fn is_same(scope: &UpdateScope<'_>, embedded: &Value) -> bool {
    let identity = |record: &Value| record.get(scope.identity_key).filter(|id| !id.is_null()).cloned();
    if let (Some(a), Some(b)) = (identity(embedded), identity(scope.parent)) {
        return a == b;
    }
    match &scope.parent_key {
        Some(parent_key) => (scope.key_fn)(embedded).as_ref() == Some(parent_key),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::analyze;
    use crate::schema::{Descriptor, SchemaErrorCode};
    use serde_json::{json, Value};

    fn order() -> crate::compiler::CompiledBundle {
        analyze(
            &Descriptor::from_json(&json!({
                "id": ["int", "<<id>>"],
                "customer": ["object", "ref", "@customers", { "id": ["int"], "name": ["string"] }],
                "lines": ["array", {
                    "n": ["int", "<<n>>"],
                    "product": ["object", "ref", "@products", { "sku": ["string"], "label": ["string"] }]
                }]
            }))
            .unwrap(),
            "order",
        )
        .unwrap()
    }

    fn sku(record: &Value) -> Option<Value> {
        record.get("sku").cloned()
    }

    #[test]
    fn test_get_collects_unique_keys() {
        let bundle = order();
        let products = bundle.references("products").unwrap();
        let record = json!({
            "id": 1,
            "lines": [
                { "n": 1, "product": { "sku": "a" } },
                { "n": 2, "product": { "sku": "b" } },
                { "n": 3, "product": { "sku": "a" } },
                { "n": 4, "product": null }
            ]
        });
        assert_eq!(products.get(Some(&sku), &record), vec![json!("a"), json!("b")]);
        assert!(products.get(None, &record).is_empty());
    }

    #[test]
    fn test_update_overwrites_matching_copies() {
        let bundle = order();
        let products = bundle.references("products").unwrap();
        let mut record = json!({
            "id": 1,
            "lines": [
                { "n": 1, "product": { "sku": "a", "label": "old" } },
                { "n": 2, "product": { "sku": "b", "label": "other" } },
                { "n": 3, "product": { "sku": "a", "label": "old" } }
            ]
        });
        let parent = json!({ "sku": "a", "label": "new" });
        assert_eq!(products.update(Some(&sku), &parent, &mut record), 2);
        assert_eq!(record["lines"][0]["product"]["label"], json!("new"));
        assert_eq!(record["lines"][1]["product"]["label"], json!("other"));
        assert_eq!(record["lines"][2]["product"]["label"], json!("new"));
    }

    #[test]
    fn test_update_by_identity() {
        let bundle = order();
        let customers = bundle.references("customers").unwrap();
        let mut record = json!({ "id": 1, "customer": { "_id": "c1", "name": "Bo" } });
        assert_eq!(customers.update(None, &json!({ "_id": "c1", "name": "Bea" }), &mut record), 1);
        assert_eq!(record["customer"]["name"], json!("Bea"));
        assert_eq!(customers.update(None, &json!({ "_id": "c2" }), &mut record), 0);
    }

    #[test]
    fn test_reference_on_scalar_fails() {
        let err = analyze(
            &Descriptor::from_json(&json!({ "id": ["int", "<<id>>"], "owner": ["string", "ref", "@users"] })).unwrap(),
            "doc",
        )
        .unwrap_err();
        assert_eq!(err.code(), SchemaErrorCode::Configuration);
        assert_eq!(err.attribute(), Some("owner"));
    }
}
