//! Structural graph cost
//!
//! Sizes are sums of per-node weights, not node counts. Two views exist:
//!
//! - [`GraphCostModel::size`] covers every live node and feeds the
//!   benefit/cost arithmetic of non-trivial inlining.
//! - [`GraphCostModel::profile`] skips bookkeeping nodes (start,
//!   parameters, frame states) and counts calls separately; it feeds the
//!   trivial classification.

use crate::config::InliningConfig;
use crate::ir::{ArithOp, Graph, NodeKind};

/// Thresholds for [`GraphCostModel::is_trivial`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrivialThresholds {
    pub max_leaf_cost: u64,
    pub max_invokes: usize,
    pub max_cost: u64,
}

impl From<&InliningConfig> for TrivialThresholds {
    fn from(config: &InliningConfig) -> Self {
        Self {
            max_leaf_cost: config.max_nodes_in_trivial_leaf_method,
            max_invokes: config.max_invokes_in_trivial_method,
            max_cost: config.max_nodes_in_trivial_method,
        }
    }
}

/// Call count and weighted cost of the non-bookkeeping nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CostProfile {
    pub invokes: usize,
    pub cost: u64,
}

/// Stateless cost model; safe to share between worker threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphCostModel;

impl GraphCostModel {
    pub fn weight(kind: &NodeKind) -> u64 {
        match kind {
            NodeKind::Arith(ArithOp::Mul) => 2,
            NodeKind::Arith(ArithOp::Div) => 4,
            NodeKind::Memory(_) | NodeKind::Call(_) | NodeKind::If => 2,
            NodeKind::Unwind | NodeKind::ExceptionObject => 2,
            _ => 1,
        }
    }

    pub fn size(&self, graph: &Graph) -> u64 {
        graph
            .live_nodes()
            .map(|(_, node)| Self::weight(&node.kind))
            .sum()
    }

    pub fn profile(&self, graph: &Graph) -> CostProfile {
        let mut profile = CostProfile::default();
        for (_, node) in graph.live_nodes() {
            match node.kind {
                kind if kind.is_bookkeeping() => {}
                NodeKind::Call(_) => profile.invokes += 1,
                kind => profile.cost += Self::weight(&kind),
            }
        }
        profile
    }

    /// Leaf methods compare against the leaf limit, methods with few calls
    /// against the non-leaf limit, everything else is non-trivial.
    pub fn is_trivial(&self, graph: &Graph, thresholds: &TrivialThresholds) -> bool {
        let profile = self.profile(graph);
        if profile.invokes == 0 {
            profile.cost <= thresholds.max_leaf_cost
        } else if profile.invokes <= thresholds.max_invokes {
            profile.cost <= thresholds.max_cost
        } else {
            false
        }
    }
}
