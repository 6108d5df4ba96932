//! Method-body intermediate representation
//!
//! A small sea-of-nodes style IR: an arena [`Graph`] of [`Node`]s with
//! explicit control edges between fixed nodes and data inputs on every
//! node. It is just rich enough for the inlining scheduler to splice,
//! measure, roll back and publish method bodies.
//!
//! ```text
//!   Start ─► Call(f) ─► If ─┬─► Store ─► End ─┐
//!                           │                 ├─► Merge ─► Return(phi)
//!                           └─► End ──────────┘
//! ```

mod builder;
mod graph;
mod node;
mod passes;

#[cfg(test)]
mod tests;

pub use builder::GraphBuilder;
pub use graph::{Edge, Graph, GraphError, GraphResult, Mark};
pub use node::{ArithOp, CallKind, CallTarget, CmpOp, MemoryOp, Node, NodeId, NodeKind};
pub use passes::{canonicalize, count_foldable, eliminate_dead_code, excise_region};
