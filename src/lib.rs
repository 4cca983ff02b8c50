//! store-compiler - compiles nested store descriptors into record procedures
//!
//! A descriptor is flattened once into a node graph plus metadata, then
//! every concern a collection runtime needs per record (keys, aggregates,
//! joins, references, filters, cloning, validation) is compiled into a
//! pre-bound procedure.
//!
//! ```ignore
//! use serde_json::json;
//! use store_compiler::{analyze, Descriptor};
//!
//! let descriptor = Descriptor::from_json(&json!({
//!     "id": ["int", "<<idMenu>>"],
//!     "dishes": ["array", { "id": ["int", "<<idDish>>"] }]
//! }))?;
//! let bundle = analyze(&descriptor, "menu")?;
//! assert_eq!(bundle.meta.sort_mandatory, vec!["idMenu", "idDish"]);
//! ```

pub mod aggregates;
pub mod compiler;
pub mod config;
pub mod observability;
pub mod schema;
pub mod synth;

pub use aggregates::{AggregateKind, AggregateOp, AggregateRegistry, AggregateState, AggregateStates};
pub use compiler::{analyze, CompiledBundle, Compiler, StoreRegistry};
pub use config::CompilerConfig;
pub use schema::{Descriptor, Directive, LoadPolicy, SchemaError, SchemaLoader, SchemaResult};
