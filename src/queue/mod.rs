//! Compile queue: the end-to-end pipeline
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────────┐   ┌─────────────┐
//! │ parse_all  │──►│ trivial      │──►│ non-trivial      │──►│ compile_all │
//! │ (waves)    │   │ rounds       │   │ rounds           │   │ (waves)     │
//! └────────────┘   └──────────────┘   └──────────────────┘   └─────────────┘
//!   entry points      to fixpoint        until all halted       entry points
//!   then deopt                                                  then deopt
//!   targets                                                     targets
//! ```
//!
//! Parsing and compiling proceed in waves: every unit of a wave runs on the
//! worker pool, then the callees discovered by the wave form the next one.
//! A unit is parsed and compiled at most once.

mod collaborators;
mod histogram;
mod suites;

#[cfg(test)]
mod tests;

pub use collaborators::{
    Backend, BackendError, CompiledArtifact, EstimatedCode, MethodResolver, ParseError, Parser,
    SizeEstimateBackend,
};
pub use histogram::{HistogramRow, MethodHistogram};
pub use suites::{Suite, SuitePhase, Suites};

use crate::config::InliningConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::inlining::{GraphCostModel, TrivialThresholds};
use crate::ir::{CallKind, CallTarget, Graph, NodeKind};
use crate::scheduler::{Phase, RoundScheduler, ScheduleReport, TaskExecutor};
use crate::universe::{UnitId, Universe};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use tracing::{debug, info, trace, warn};

/// Why a unit is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileReason {
    EntryPoint,
    DirectCall { caller: UnitId },
    VirtualCall { caller: UnitId },
    DeoptTarget,
}

#[derive(Debug, Clone)]
pub struct CompileTask<A> {
    pub unit: UnitId,
    pub reason: CompileReason,
    pub artifact: A,
}

/// Outcome of [`CompileQueue::finish`].
#[derive(Debug, Clone)]
pub struct CompileSummary {
    pub parsed: usize,
    pub schedule: ScheduleReport,
    pub compiled: usize,
    pub histogram: MethodHistogram,
}

pub struct CompileQueue<P, R, B: Backend> {
    universe: Universe,
    parser: P,
    resolver: R,
    backend: B,
    config: InliningConfig,
    executor: TaskExecutor,
    suites: Suites,
    cost: GraphCostModel,
    compilations: DashMap<UnitId, CompileTask<B::Artifact>>,
}

impl<P: Parser, R: MethodResolver, B: Backend> CompileQueue<P, R, B> {
    /// Validate the configuration and start the worker pool.
    pub fn new(
        universe: Universe,
        parser: P,
        resolver: R,
        backend: B,
        config: InliningConfig,
    ) -> SchedulerResult<Self> {
        config.validate()?;
        let executor = TaskExecutor::new(config.worker_threads())?;
        Ok(Self {
            universe,
            parser,
            resolver,
            backend,
            config,
            executor,
            suites: Suites::default(),
            cost: GraphCostModel,
            compilations: DashMap::new(),
        })
    }

    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    pub fn config(&self) -> &InliningConfig {
        &self.config
    }

    pub fn compilation(&self, unit: UnitId) -> Option<dashmap::mapref::one::Ref<'_, UnitId, CompileTask<B::Artifact>>> {
        self.compilations.get(&unit)
    }

    pub fn compiled_count(&self) -> usize {
        self.compilations.len()
    }

    /// Run the whole pipeline.
    pub fn finish(&self) -> SchedulerResult<CompileSummary> {
        let parsed = self.parse_all()?;
        let schedule = self.inline_all()?;
        let compiled = self.compile_all()?;
        let histogram = self.histogram();
        info!(
            target: "aotinline::queue",
            parsed,
            trivial_rounds = schedule.trivial.round_count(),
            non_trivial_rounds = schedule.non_trivial.round_count(),
            compiled,
            code_size = histogram.total_code_size(),
            "Compilation finished"
        );
        Ok(CompileSummary {
            parsed,
            schedule,
            compiled,
            histogram,
        })
    }

    // ========================================================================
    // Parsing
    // ========================================================================

    /// Parse everything reachable from the entry points, then the
    /// deoptimization targets of parsed units. Returns the parsed count.
    pub fn parse_all(&self) -> SchedulerResult<usize> {
        let entry_points: Vec<UnitId> = self
            .universe
            .entry_points()
            .into_iter()
            .filter(|&id| self.universe.unit(id).claim_parse())
            .collect();
        let mut parsed = self.parse_waves(entry_points)?;

        let deopt_targets: Vec<UnitId> = self
            .universe
            .deopt_targets()
            .into_iter()
            .filter(|&id| {
                let unit = self.universe.unit(id);
                let original_parsed = unit
                    .original()
                    .is_some_and(|o| self.universe.unit(o).has_graph());
                original_parsed && unit.claim_parse()
            })
            .collect();
        parsed += self.parse_waves(deopt_targets)?;
        Ok(parsed)
    }

    fn parse_waves(&self, mut wave: Vec<UnitId>) -> SchedulerResult<usize> {
        let thresholds = TrivialThresholds::from(&self.config);
        let mut parsed = 0;
        let mut wave_no = 0u32;
        while !wave.is_empty() {
            wave_no += 1;
            let results = self.executor.map_all(&wave, |id| {
                self.parse_task(id).map_err(|e| {
                    e.in_round(Phase::Parse, wave_no, self.universe.unit(id).qualified_name())
                })
            })?;

            let mut next = Vec::new();
            for (&id, (graph, callees)) in wave.iter().zip(results) {
                let unit = self.universe.unit(id);
                unit.counters
                    .nodes_after_parsing
                    .store(graph.live_count(), Ordering::Relaxed);
                if !unit.flags().never_inline && self.cost.is_trivial(&graph, &thresholds) {
                    unit.set_trivial();
                }
                unit.set_graph(graph);
                for callee in callees {
                    if self.universe.get(callee).is_some_and(|c| c.claim_parse()) {
                        next.push(callee);
                    }
                }
                parsed += 1;
            }
            debug!(
                target: "aotinline::queue::parse",
                wave = wave_no,
                parsed = wave.len(),
                discovered = next.len(),
                "Parse wave finished"
            );
            wave = next;
        }
        Ok(parsed)
    }

    /// Parse one unit, devirtualize single-implementation calls and list
    /// the reachable callees.
    fn parse_task(&self, id: UnitId) -> SchedulerResult<(Graph, Vec<UnitId>)> {
        let unit = self.universe.unit(id);
        let mut graph = self.parser.parse(&self.universe, unit)?;
        graph.verify().map_err(|source| SchedulerError::Graph {
            unit: unit.qualified_name(),
            source,
        })?;

        let mut callees = Vec::new();
        for call in graph.call_sites() {
            let Some(target) = graph.node(call).kind.call_target() else {
                continue;
            };
            match target.kind {
                CallKind::Direct => {
                    if self.resolver.is_reachable(target.method) {
                        callees.push(target.method);
                    }
                }
                CallKind::Virtual => {
                    let implementations: Vec<UnitId> = self
                        .resolver
                        .implementations(target.method)
                        .into_iter()
                        .filter(|&m| self.resolver.is_reachable(m))
                        .collect();
                    if let [single] = implementations.as_slice() {
                        graph.set_kind(call, NodeKind::Call(CallTarget::direct(*single)));
                        trace!(
                            target: "aotinline::queue::parse",
                            unit = %unit.qualified_name(),
                            call = %call,
                            implementation = %single,
                            "Devirtualized call"
                        );
                    }
                    callees.extend(implementations);
                }
            }
        }
        Ok((graph, callees))
    }

    // ========================================================================
    // Inlining
    // ========================================================================

    pub fn inline_all(&self) -> SchedulerResult<ScheduleReport> {
        RoundScheduler::new(&self.universe, &self.config, &self.executor).run()
    }

    // ========================================================================
    // Compilation
    // ========================================================================

    /// Compile entry points and everything their final graphs call, then
    /// the deoptimization targets. Returns the number of compiled units.
    pub fn compile_all(&self) -> SchedulerResult<usize> {
        let mut scheduled: HashSet<UnitId> = HashSet::new();

        let mut entry_wave = Vec::new();
        for id in self.universe.entry_points() {
            let unit = self.universe.unit(id);
            unit.counters.entry_point.fetch_add(1, Ordering::Relaxed);
            if unit.has_graph() && scheduled.insert(id) {
                entry_wave.push((id, CompileReason::EntryPoint));
            }
        }
        self.compile_waves(entry_wave, &mut scheduled)?;

        let deopt_wave: Vec<(UnitId, CompileReason)> = self
            .universe
            .deopt_targets()
            .into_iter()
            .filter(|&id| self.universe.unit(id).has_graph() && scheduled.insert(id))
            .map(|id| (id, CompileReason::DeoptTarget))
            .collect();
        self.compile_waves(deopt_wave, &mut scheduled)?;

        Ok(self.compilations.len())
    }

    fn compile_waves(
        &self,
        mut wave: Vec<(UnitId, CompileReason)>,
        scheduled: &mut HashSet<UnitId>,
    ) -> SchedulerResult<()> {
        let mut wave_no = 0u32;
        while !wave.is_empty() {
            wave_no += 1;
            let results = self.executor.map_all(&wave, |(id, reason)| {
                self.compile_task(id, reason).map_err(|e| {
                    e.in_round(Phase::Compile, wave_no, self.universe.unit(id).qualified_name())
                })
            })?;

            let mut next = Vec::new();
            for (callee, reason) in results.into_iter().flatten() {
                let Some(unit) = self.universe.get(callee) else {
                    continue;
                };
                let counter = match reason {
                    CompileReason::VirtualCall { .. } => &unit.counters.virtual_calls,
                    _ => &unit.counters.direct_calls,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                if !unit.has_graph() {
                    warn!(
                        target: "aotinline::queue::compile",
                        unit = %unit.qualified_name(),
                        "Called unit was never parsed; not compiled"
                    );
                    continue;
                }
                if scheduled.insert(callee) {
                    next.push((callee, reason));
                }
            }
            wave = next;
        }
        Ok(())
    }

    /// Optimize and compile one unit. Returns the calls of its final graph.
    fn compile_task(
        &self,
        id: UnitId,
        reason: CompileReason,
    ) -> SchedulerResult<Vec<(UnitId, CompileReason)>> {
        let unit = self.universe.unit(id);
        let published = unit.graph().ok_or_else(|| SchedulerError::MissingGraph {
            unit: unit.qualified_name(),
        })?;
        let mut graph = (*published).clone();
        unit.counters
            .nodes_before_compile
            .store(graph.live_count(), Ordering::Relaxed);

        self.suites.for_unit(unit).apply(&mut graph);
        let graph = graph.encode().map_err(|source| SchedulerError::Graph {
            unit: unit.qualified_name(),
            source,
        })?;
        unit.counters
            .nodes_after_compile
            .store(graph.live_count(), Ordering::Relaxed);

        let artifact = self.backend.compile(unit, &graph)?;
        let mut callees = Vec::new();
        for (_, node) in graph.live_nodes() {
            let Some(target) = node.kind.call_target() else {
                continue;
            };
            match target.kind {
                CallKind::Direct => {
                    callees.push((target.method, CompileReason::DirectCall { caller: id }))
                }
                CallKind::Virtual => callees.extend(
                    self.resolver
                        .implementations(target.method)
                        .into_iter()
                        .filter(|&m| self.resolver.is_reachable(m))
                        .map(|m| (m, CompileReason::VirtualCall { caller: id })),
                ),
            }
        }
        self.compilations.insert(
            id,
            CompileTask {
                unit: id,
                reason,
                artifact,
            },
        );
        Ok(callees)
    }

    /// Histogram over every compiled unit.
    pub fn histogram(&self) -> MethodHistogram {
        MethodHistogram::new(self.compilations.iter().map(|entry| {
            HistogramRow::new(
                self.universe.unit(*entry.key()),
                entry.value().artifact.code_size(),
            )
        }))
    }

    /// Compiled artifacts in unit order.
    pub fn into_compilations(self) -> Vec<CompileTask<B::Artifact>> {
        let mut tasks: Vec<_> = self.compilations.into_iter().map(|(_, t)| t).collect();
        tasks.sort_by_key(|t| t.unit);
        tasks
    }
}
