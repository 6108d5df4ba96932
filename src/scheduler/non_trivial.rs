//! Non-trivial phase: `Scanning -> Recomputing targets -> Publishing -> (Scanning | Halted)`
//!
//! 1. Scan (parallel): every active unit decodes its published body once,
//!    trying to commit its marked target and re-measuring candidates whose
//!    callee changed. Results go to the unit's side-table slot.
//! 2. Recompute (sequential, unit order): each unit picks its next target
//!    from its candidate records, or halts when nothing is left to do.
//! 3. Publish: side-table graphs are installed and their units marked
//!    changed for the next round.
//!
//! A unit's round-N decision only depends on state fixed at the end of
//! round N-1, which makes the outcome independent of task scheduling.

use super::round::{publish, PhaseReport, RoundContext, RoundStats, Unpublished};
use super::{Phase, RoundScheduler};
use crate::error::{SchedulerError, SchedulerResult};
use crate::inlining::{InliningDecoder, Policy, SpeculativeInliner};
use crate::ir::{canonicalize, CallKind};
use crate::universe::UnitId;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

impl RoundScheduler<'_> {
    /// Count live direct call sites per target over all published graphs.
    pub fn recount_callsites(&self) {
        let mut counts = vec![0u32; self.universe.len()];
        for unit in self.universe.iter() {
            let Some(graph) = unit.graph() else { continue };
            for (_, node) in graph.live_nodes() {
                if let Some(target) = node.kind.call_target() {
                    if target.kind == CallKind::Direct {
                        if let Some(count) = counts.get_mut(target.method.index()) {
                            *count += 1;
                        }
                    }
                }
            }
        }
        for (unit, count) in self.universe.iter().zip(counts) {
            unit.set_callsites(count);
        }
    }

    fn active_units(&self) -> Vec<UnitId> {
        self.universe
            .iter()
            .filter(|u| u.has_graph() && !u.is_halted())
            .map(|u| u.id())
            .collect()
    }

    pub fn run_non_trivial_phase(&self) -> SchedulerResult<PhaseReport> {
        let policy = Policy::non_trivial(self.config);
        self.recount_callsites();
        for unit in self.universe.iter() {
            unit.set_changed(false);
        }

        let mut report = PhaseReport::default();
        let mut round = 0u32;
        loop {
            if round == self.config.max_non_trivial_rounds {
                return Err(SchedulerError::RoundLimit {
                    phase: Phase::NonTrivial,
                    rounds: round,
                });
            }
            round += 1;
            let ctx = RoundContext::new(Phase::NonTrivial, round, self.universe.len());
            let active = self.active_units();
            let fallback = AtomicUsize::new(0);

            self.executor.run_all(&active, |id| {
                self.non_trivial_task(&policy, &ctx, id, &fallback).map_err(|e| {
                    e.in_round(Phase::NonTrivial, round, self.universe.unit(id).qualified_name())
                })
            })?;

            let mut all_halted = true;
            let mut halted = fallback.into_inner();
            for &id in &active {
                let unit = self.universe.unit(id);
                if unit.is_halted() {
                    continue;
                }
                let mut state = unit.lock_state();
                let selection = state
                    .callees
                    .select_target(|callee| ctx.changed_this_round(callee));
                state.target = selection.target;
                if selection.target.is_some() || selection.any_changed || round == 1 {
                    all_halted = false;
                } else {
                    unit.halt();
                    halted += 1;
                }
            }

            let mut stats = RoundStats {
                round,
                scanned: active.len(),
                halted,
                ..Default::default()
            };
            publish(self.universe, ctx.side_table, true, &mut stats);
            stats.active = active.len() - halted;
            info!(
                target: "aotinline::scheduler::non_trivial",
                round,
                scanned = stats.scanned,
                committed = stats.published,
                halted = stats.halted,
                active = stats.active,
                "Non-trivial round finished"
            );
            report.rounds.push(stats);

            if all_halted {
                return Ok(report);
            }
        }
    }

    fn non_trivial_task(
        &self,
        policy: &Policy,
        ctx: &RoundContext,
        id: UnitId,
        fallback: &AtomicUsize,
    ) -> SchedulerResult<()> {
        let unit = self.universe.unit(id);
        let decoder = InliningDecoder::new(
            self.universe,
            policy,
            SpeculativeInliner::new(self.cost),
            id,
            ctx.round,
        );
        let mut state = unit.lock_state();
        let outcome = decoder
            .decode(&mut state)
            .map_err(|source| SchedulerError::Inlining {
                unit: unit.qualified_name(),
                source,
            })?;

        if outcome.target_committed {
            state.callees.promote_second_level();
        } else {
            if let Some(target) = state.target {
                if let Some(record) = state.callees.get_mut(target.callee) {
                    record.ignore = true;
                }
            }
            state.callees.discard_second_level();
        }

        let mut graph = outcome.graph;
        if outcome.commits > 0 {
            canonicalize(&mut graph);
        }
        let size = self.cost.size(&graph);
        if size > self.config.size_fallback_ceiling {
            unit.halt();
            fallback.fetch_add(1, Ordering::Relaxed);
            debug!(
                target: "aotinline::scheduler::non_trivial",
                unit = %unit.qualified_name(),
                round = ctx.round,
                size,
                ceiling = self.config.size_fallback_ceiling,
                "Inlining halted at the size ceiling"
            );
        }
        drop(state);

        if outcome.commits == 0 {
            return Ok(());
        }
        let graph = graph.encode().map_err(|source| SchedulerError::Graph {
            unit: unit.qualified_name(),
            source,
        })?;
        ctx.side_table.put(
            self.universe,
            id,
            Unpublished {
                graph,
                newly_trivial: false,
                callsite_deltas: outcome.callsite_deltas,
            },
        )
    }
}
