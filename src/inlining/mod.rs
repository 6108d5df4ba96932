//! Call-site inlining
//!
//! Leaves first:
//!
//! | Module        | Role                                                     |
//! |---------------|----------------------------------------------------------|
//! | `callee`      | per-(root, callee) candidate records                     |
//! | `cost`        | weighted graph size and trivial classification           |
//! | `speculative` | transactional splice with rollback                       |
//! | `policy`      | trivial and benefit/cost decisions                       |
//! | `decoder`     | depth-first pass applying the policy to one root's body  |

mod callee;
mod cost;
mod decoder;
mod policy;
mod speculative;


pub use callee::{depth_adjusted, CalleeRecord, CalleeTable, InlineTarget, Selection};
pub use cost::{CostProfile, GraphCostModel, TrivialThresholds};
pub use decoder::{DecodeOutcome, InliningDecoder};
pub use policy::{
    BenefitCostStrategy, Decision, DecodeState, EvaluationDepth, NonTrivialPolicy, Policy,
    PriorityStrategy, ScopeMeasurement, SiteContext, TrivialPolicy,
};
pub use speculative::{splice, RecordSlot, SpeculativeInliner, SpeculativeScope, SpliceOutcome};

use crate::ir::{GraphError, NodeId};
use crate::universe::UnitId;

/// Mutable inlining state of one root unit.
#[derive(Debug, Default)]
pub struct InliningState {
    pub callees: CalleeTable,
    /// Candidate to commit in the current round
    pub target: Option<InlineTarget>,
    pub inlined_bytes: u64,
    pub inlined_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InliningError {
    /// Splice failed; the caller graph was restored
    Splice { call: NodeId, source: GraphError },
    /// The caller graph is malformed after a rollback
    RollbackCorrupted { call: NodeId, source: GraphError },
    /// Transactions were closed out of order
    Transaction(GraphError),
    /// A decision was requested for a pair that was never recorded
    MissingCalleeRecord { root: UnitId, callee: UnitId },
    /// A unit that should have a graph has none
    MissingGraph(UnitId),
}

impl std::fmt::Display for InliningError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Splice { call, source } => write!(f, "Splice at {} failed: {}", call, source),
            Self::RollbackCorrupted { call, source } => {
                write!(f, "Graph malformed after rolling back {}: {}", call, source)
            }
            Self::Transaction(e) => write!(f, "Transaction error: {}", e),
            Self::MissingCalleeRecord { root, callee } => {
                write!(f, "No callee record for {} in root {}", callee, root)
            }
            Self::MissingGraph(unit) => write!(f, "Unit {} has no graph", unit),
        }
    }
}

impl std::error::Error for InliningError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Splice { source, .. } | Self::RollbackCorrupted { source, .. } => Some(source),
            Self::Transaction(e) => Some(e),
            _ => None,
        }
    }
}
