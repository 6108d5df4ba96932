//! Depth-first inlining pass over one root's body
//!
//! The decoder walks the call sites of a private copy of the root's
//! published graph. For every admitted site it opens a speculative scope,
//! evaluates the sites copied in with that scope when the callee is the
//! round's target, then asks the policy for a verdict and commits or rolls
//! back the scope.
//!
//! ```text
//!   root ─┬─ call a            FirstLevel   (measured, rolled back)
//!         ├─ call t  (target)  FirstLevel   ─┬─ call x   SecondLevel (measured)
//!         │                                  └─ call y   SecondLevel (measured)
//!         └─ call b            FirstLevel   (cached, not admitted)
//! ```

use super::InliningState;
use super::policy::{DecodeState, Decision, EvaluationDepth, Policy, ScopeMeasurement, SiteContext};
use super::speculative::{RecordSlot, SpeculativeInliner};
use super::InliningError;
use crate::ir::{CallKind, Graph, NodeId};
use crate::universe::{UnitId, Universe};
use std::collections::BTreeMap;
use tracing::trace;

/// Result of decoding one root.
#[derive(Debug, Clone)]
pub struct DecodeOutcome {
    /// The root's body after all committed splices
    pub graph: Graph,
    /// Number of committed splices (at any depth)
    pub commits: u32,
    /// Whether the round's target was committed
    pub target_committed: bool,
    /// Net change of live call sites per callee
    pub callsite_deltas: BTreeMap<UnitId, i32>,
}

impl DecodeOutcome {
    pub fn inlined(&self) -> bool {
        self.commits > 0
    }
}

pub struct InliningDecoder<'a> {
    universe: &'a Universe,
    policy: &'a Policy,
    inliner: SpeculativeInliner,
    root: UnitId,
    round: u32,
}

impl<'a> InliningDecoder<'a> {
    pub fn new(
        universe: &'a Universe,
        policy: &'a Policy,
        inliner: SpeculativeInliner,
        root: UnitId,
        round: u32,
    ) -> Self {
        Self {
            universe,
            policy,
            inliner,
            root,
            round,
        }
    }

    fn site(&self, caller: UnitId, callee: UnitId, depth: EvaluationDepth, parent_is_target: bool) -> SiteContext<'a> {
        SiteContext {
            universe: self.universe,
            root: self.root,
            caller,
            callee,
            depth,
            parent_is_target,
            round: self.round,
        }
    }

    fn direct_target(graph: &Graph, call: NodeId) -> Option<UnitId> {
        let target = graph.live(call)?.kind.call_target()?;
        (target.kind == CallKind::Direct).then_some(target.method)
    }

    /// Whether any first-level site would be admitted.
    pub fn has_potential(&self, graph: &Graph, state: &InliningState) -> bool {
        let decode = DecodeState::new(state.target);
        graph.call_sites().into_iter().any(|call| {
            Self::direct_target(graph, call).is_some_and(|callee| {
                let site = self.site(self.root, callee, EvaluationDepth::FirstLevel, false);
                self.policy.admits(&site, state, &decode)
            })
        })
    }

    pub fn decode(&self, state: &mut InliningState) -> Result<DecodeOutcome, InliningError> {
        let published = self
            .universe
            .get(self.root)
            .and_then(|u| u.graph())
            .ok_or(InliningError::MissingGraph(self.root))?;
        let mut graph = (*published).clone();
        let mut decode = DecodeState::new(state.target);
        let mut outcome = DecodeOutcome {
            graph: Graph::new(),
            commits: 0,
            target_committed: false,
            callsite_deltas: BTreeMap::new(),
        };

        for call in graph.call_sites() {
            self.visit(
                &mut graph,
                call,
                self.root,
                EvaluationDepth::FirstLevel,
                false,
                0,
                state,
                &mut decode,
                &mut outcome,
            )?;
        }

        outcome.target_committed = decode.target_committed;
        outcome.callsite_deltas.retain(|_, delta| *delta != 0);
        outcome.graph = graph;
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn visit(
        &self,
        graph: &mut Graph,
        call: NodeId,
        caller: UnitId,
        depth: EvaluationDepth,
        parent_is_target: bool,
        parent_depth: u32,
        state: &mut InliningState,
        decode: &mut DecodeState,
        outcome: &mut DecodeOutcome,
    ) -> Result<(), InliningError> {
        let Some(callee) = Self::direct_target(graph, call) else {
            return Ok(());
        };
        let site = self.site(caller, callee, depth, parent_is_target);
        if !self.policy.admits(&site, state, decode) {
            return Ok(());
        }
        let Some(callee_graph) = self.universe.get(callee).and_then(|u| u.graph()) else {
            return Ok(());
        };
        if !SpeculativeInliner::is_inlinable(graph, call, &callee_graph) {
            return Ok(());
        }

        let record_depth = parent_depth + 1;
        let record = self.policy.tracks_candidates().then_some(RecordSlot {
            table: &mut state.callees,
            depth: record_depth,
            second_level: depth == EvaluationDepth::SecondLevel,
        });
        let scope = self
            .inliner
            .begin(graph, call, callee, &callee_graph, record)?;

        // Only the open target's scope is walked one level deeper.
        let commits_before = outcome.commits;
        let scope_is_target = depth == EvaluationDepth::FirstLevel
            && self.policy.tracks_candidates()
            && decode.is_open_target(callee);
        if let (true, Some(deeper)) = (scope_is_target, depth.deeper()) {
            let scope_depth = decode.target.map_or(record_depth, |t| t.depth);
            let nested: Vec<NodeId> = graph
                .call_sites()
                .into_iter()
                .filter(|&c| c >= scope.outcome.first_new)
                .collect();
            for nested_call in nested {
                self.visit(
                    graph,
                    nested_call,
                    callee,
                    deeper,
                    true,
                    scope_depth,
                    state,
                    decode,
                    outcome,
                )?;
            }
        }

        let measurement = ScopeMeasurement {
            current_size: self.inliner.cost_model().size(graph),
            size_before: scope.size_before,
            invokes: scope.outcome.invokes,
            improved_stamps: scope.outcome.improved_stamps,
            benefit: scope.outcome.benefit,
        };
        match self.policy.decide(&site, &measurement, state, decode)? {
            Decision::Commit => {
                if depth == EvaluationDepth::FirstLevel {
                    *outcome.callsite_deltas.entry(callee).or_default() -= 1;
                    for copied in graph.call_sites() {
                        if copied < scope.outcome.first_new {
                            continue;
                        }
                        if let Some(target) = Self::direct_target(graph, copied) {
                            *outcome.callsite_deltas.entry(target).or_default() += 1;
                        }
                    }
                }
                trace!(
                    target: "aotinline::inlining::decoder",
                    root = %self.root,
                    callee = %callee,
                    ?depth,
                    round = self.round,
                    growth = measurement.growth(),
                    "Splice kept"
                );
                self.inliner.commit(graph, scope)?;
                outcome.commits += 1;
            }
            Decision::Reject => {
                self.inliner.rollback(graph, scope)?;
                outcome.commits = commits_before;
            }
        }
        Ok(())
    }
}
