//! Trivial phase: `Scanning -> Publishing -> (Scanning | Done)`
//!
//! Every unit with a graph splices its trivial and always-inline callees
//! (first level only). The phase repeats while a round publishes a graph,
//! marks a unit newly trivial, or disables trivial inlining for a unit
//! whose graph grew too large.

use super::round::{publish, PhaseReport, RoundContext, RoundStats, Unpublished};
use super::{Phase, RoundScheduler};
use crate::error::{SchedulerError, SchedulerResult};
use crate::inlining::{InliningDecoder, Policy, SpeculativeInliner, TrivialThresholds};
use crate::ir::{canonicalize, Graph};
use crate::universe::{MethodUnit, UnitId};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

impl RoundScheduler<'_> {
    pub fn run_trivial_phase(&self) -> SchedulerResult<PhaseReport> {
        let policy = Policy::trivial(self.config);
        let thresholds = TrivialThresholds::from(self.config);
        let mut report = PhaseReport::default();

        for round in 1..=self.config.max_trivial_rounds {
            let ctx = RoundContext::new(Phase::Trivial, round, self.universe.len());
            let units = self.universe.units_with_graph();
            let disabled = AtomicUsize::new(0);

            self.executor.run_all(&units, |id| {
                self.trivial_task(&policy, &thresholds, &ctx, id, &disabled)
                    .map_err(|e| e.in_round(Phase::Trivial, round, self.universe.unit(id).qualified_name()))
            })?;

            let mut stats = RoundStats {
                round,
                scanned: units.len(),
                trivial_disabled: disabled.into_inner(),
                ..Default::default()
            };
            publish(self.universe, ctx.side_table, false, &mut stats);
            stats.active = units.len();
            info!(
                target: "aotinline::scheduler::trivial",
                round,
                scanned = stats.scanned,
                published = stats.published,
                newly_trivial = stats.newly_trivial,
                trivial_disabled = stats.trivial_disabled,
                "Trivial round finished"
            );

            let progress =
                stats.published > 0 || stats.newly_trivial > 0 || stats.trivial_disabled > 0;
            report.rounds.push(stats);
            if !progress {
                return Ok(report);
            }
        }

        warn!(
            target: "aotinline::scheduler::trivial",
            rounds = self.config.max_trivial_rounds,
            "Trivial inlining stopped at the round limit"
        );
        Ok(report)
    }

    fn trivial_task(
        &self,
        policy: &Policy,
        thresholds: &TrivialThresholds,
        ctx: &RoundContext,
        id: UnitId,
        disabled: &AtomicUsize,
    ) -> SchedulerResult<()> {
        let unit = self.universe.unit(id);
        let Some(published) = unit.graph() else {
            return Ok(());
        };
        let decoder = InliningDecoder::new(
            self.universe,
            policy,
            SpeculativeInliner::new(self.cost),
            id,
            ctx.round,
        );

        let outcome = {
            let mut state = unit.lock_state();
            if !decoder.has_potential(&published, &state) {
                return Ok(());
            }
            decoder
                .decode(&mut state)
                .map_err(|source| SchedulerError::Inlining {
                    unit: unit.qualified_name(),
                    source,
                })?
        };
        if !outcome.inlined() {
            return Ok(());
        }

        let mut graph = outcome.graph;
        canonicalize(&mut graph);
        if graph.live_count() > self.config.max_nodes_after_trivial_inlining
            && unit.disable_trivial_inlining()
        {
            disabled.fetch_add(1, Ordering::Relaxed);
            debug!(
                target: "aotinline::scheduler::trivial",
                unit = %unit.qualified_name(),
                nodes = graph.live_count(),
                limit = self.config.max_nodes_after_trivial_inlining,
                "Trivial inlining disabled after size explosion"
            );
            return Ok(());
        }

        let graph = graph.encode().map_err(|source| SchedulerError::Graph {
            unit: unit.qualified_name(),
            source,
        })?;
        let newly_trivial = self.is_newly_trivial(unit, &graph, thresholds);
        ctx.side_table.put(
            self.universe,
            id,
            Unpublished {
                graph,
                newly_trivial,
                callsite_deltas: outcome.callsite_deltas,
            },
        )
    }

    pub(crate) fn is_newly_trivial(
        &self,
        unit: &MethodUnit,
        graph: &Graph,
        thresholds: &TrivialThresholds,
    ) -> bool {
        !unit.is_trivial()
            && !unit.flags().never_inline
            && self.cost.is_trivial(graph, thresholds)
    }
}
