//! Computed-property compiler

use serde_json::Value;

use super::{transform, CompileContext};
use crate::observability::Logger;
use crate::schema::SchemaResult;
use crate::synth::{Cursor, LoopScaffold, Program, Scope};

pub struct ComputedScope<'r> {
    record: &'r mut Value,
    constants: &'r Value,
    logger: &'r dyn Logger,
}

impl Scope for ComputedScope<'_> {
    fn record(&self) -> &Value {
        &*self.record
    }
}

type ComputedFragment = Box<dyn for<'r, 'c> Fn(&mut ComputedScope<'r>, &Cursor<'c>) + Send + Sync>;

fn fragment<F>(f: F) -> ComputedFragment
where
    F: for<'r, 'c> Fn(&mut ComputedScope<'r>, &Cursor<'c>) + Send + Sync + 'static,
{
    Box::new(f)
}

/// Evaluates computed fields with `(owning object, constants)`
#[derive(Debug)]
pub struct ComputedFn {
    program: Program<ComputedFragment>,
}

impl ComputedFn {
    pub(crate) fn compile(ctx: &CompileContext<'_>) -> SchemaResult<Self> {
        let mut scaffold = LoopScaffold::new(format!("{}.computeds", ctx.store));

        for computed in &ctx.meta.computeds {
            let resolved = ctx
                .resolve_strict(&computed.path)
                .map_err(|unresolved| ctx.config_error(&computed.path, unresolved.to_string()))?;
            let (owner, field) = match resolved.leaf.split_last() {
                Some((field, owner)) => (owner.to_vec(), field.clone()),
                None => return Err(ctx.config_error(&computed.path, "computed field has no name")),
            };
            let handler = computed.handler.clone();
            let path = computed.path.clone();

            scaffold.level(&resolved.loops).body(
                format!("compute {}", resolved.expression()),
                fragment(move |scope, cursor| {
                    let object = match cursor.get(scope.record, &owner) {
                        Some(object) if object.is_object() => object.clone(),
                        _ => return,
                    };
                    let value = transform(
                        "computed",
                        &path,
                        Some(&handler),
                        object,
                        scope.constants,
                        scope.logger,
                    );
                    let mut target = owner.clone();
                    target.push(field.clone());
                    cursor.set_at(scope.record, cursor.depth(), &target, value);
                }),
            );
        }

        let program = scaffold
            .synthesize()
            .map_err(|failure| ctx.build_error("computeds", failure))?;
        Ok(Self { program })
    }

    /// Evaluates every computed field reached in `object`.
    pub fn apply(&self, object: &mut Value, constants: &Value, logger: &dyn Logger) {
        let mut scope = ComputedScope {
            record: object,
            constants,
            logger,
        };
        self.program.run(&mut scope);
    }

    pub fn plan(&self) -> &str {
        self.program.plan()
    }
}
