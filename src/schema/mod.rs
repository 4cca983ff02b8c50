//! Store descriptors and their flattened form
//!
//! A descriptor is declared once per store. Flattening turns it into a node
//! graph plus [`Metadata`]; the compilers in `crate::compiler` build their
//! procedures from that output.
//!
//! # Design Principles
//!
//! - Descriptors are immutable once registered
//! - Malformed descriptors fail at registration, never at the first record
//! - Flattening is deterministic

mod descriptor;
mod errors;
mod flattener;
mod loader;
mod meta;
mod node;
mod tokenizer;
mod transformer;
mod types;
mod validator;

pub use descriptor::{Attribute, Descriptor, Directive, Handler, HandlerFn};
pub use errors::{
    SchemaError, SchemaErrorCode, SchemaResult, Severity, TransformerError, ValidationDetails,
};
pub use flattener::{flatten, Flattened, Flattener};
pub use loader::{LoadPolicy, LoadReport, SchemaLoader};
pub use meta::{
    AggregateDecl, ComputedDecl, ExternalAggregateDecl, Hook, JoinCardinality, JoinDecl, Metadata,
};
pub use node::{AttributeDef, NodeKind, NodeMap, ObjectNode};
pub use transformer::RecordTransformer;
pub use types::{Conversion, ScalarType, ValidationRule};
pub use validator::RecordValidator;

pub(crate) use descriptor::json_type_name;
pub(crate) use types::number_value;
