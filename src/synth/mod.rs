//! Path/loop synthesis
//!
//! [`PathResolver`] turns dotted attribute paths into loop specs and leaf
//! accesses; [`LoopScaffold`] collects the fragments of one procedure per
//! loop level and freezes them into a [`Program`].

mod path;
mod scaffold;

pub use path::{LoopSpec, PathResolver, PathTarget, ResolvedPath, Unresolved};
pub use scaffold::{BuildFailure, Cursor, LoopLevel, LoopScaffold, Program, Scope, Step};
