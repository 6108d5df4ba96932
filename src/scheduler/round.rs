//! Per-round context shared by all unit tasks of one round
//!
//! ```text
//!            ┌──────────── round N ────────────┐
//!   scan:    task(u0)  task(u1)  ...  task(uK)    write own slot only
//!            ─────────────── barrier ──────────
//!   recompute (non-trivial only, sequential)      reads slots
//!   publish:  drain slots into the universe       sequential
//!            └─────────────────────────────────┘
//! ```

use crate::error::{SchedulerError, SchedulerResult};
use crate::ir::Graph;
use crate::universe::{UnitId, Universe};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Parse,
    Trivial,
    NonTrivial,
    Compile,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Parse => write!(f, "parse"),
            Phase::Trivial => write!(f, "trivial"),
            Phase::NonTrivial => write!(f, "non-trivial"),
            Phase::Compile => write!(f, "compile"),
        }
    }
}

/// A rewritten graph waiting for the publish step.
#[derive(Debug, Clone)]
pub struct Unpublished {
    pub graph: Graph,
    /// The unit became trivial with this graph
    pub newly_trivial: bool,
    pub callsite_deltas: BTreeMap<UnitId, i32>,
}

/// One write-once slot per unit.
#[derive(Debug)]
pub struct SideTable {
    slots: Vec<OnceLock<Unpublished>>,
}

impl SideTable {
    pub fn new(units: usize) -> Self {
        Self {
            slots: (0..units).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn put(&self, universe: &Universe, unit: UnitId, value: Unpublished) -> SchedulerResult<()> {
        let slot = self.slots.get(unit.index()).ok_or_else(|| SchedulerError::MissingGraph {
            unit: unit.to_string(),
        })?;
        slot.set(value)
            .map_err(|_| SchedulerError::DuplicatePublication {
                unit: universe
                    .get(unit)
                    .map_or_else(|| unit.to_string(), |u| u.qualified_name()),
            })
    }

    pub fn get(&self, unit: UnitId) -> Option<&Unpublished> {
        self.slots.get(unit.index()).and_then(OnceLock::get)
    }

    /// Filled slots in unit order.
    pub fn drain(self) -> impl Iterator<Item = (UnitId, Unpublished)> {
        self.slots
            .into_iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.into_inner().map(|u| (UnitId::new(i), u)))
    }
}

/// Explicit round state handed to every task.
#[derive(Debug)]
pub struct RoundContext {
    pub phase: Phase,
    pub round: u32,
    pub side_table: SideTable,
}

impl RoundContext {
    pub fn new(phase: Phase, round: u32, units: usize) -> Self {
        Self {
            phase,
            round,
            side_table: SideTable::new(units),
        }
    }

    /// The unit will publish a new graph at the end of this round.
    pub fn changed_this_round(&self, unit: UnitId) -> bool {
        self.side_table.get(unit).is_some()
    }
}

/// What one round did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundStats {
    pub round: u32,
    /// Units whose task ran
    pub scanned: usize,
    /// Units that published a new graph
    pub published: usize,
    pub newly_trivial: usize,
    /// Units that had trivial inlining disabled this round
    pub trivial_disabled: usize,
    /// Units that halted this round
    pub halted: usize,
    /// Units still active after this round
    pub active: usize,
}

/// All rounds of one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseReport {
    pub rounds: Vec<RoundStats>,
}

impl PhaseReport {
    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    pub fn total_published(&self) -> usize {
        self.rounds.iter().map(|r| r.published).sum()
    }
}

/// Install every side-table result and count it into `stats`.
pub(crate) fn publish(
    universe: &Universe,
    side_table: SideTable,
    mark_changed: bool,
    stats: &mut RoundStats,
) {
    if mark_changed {
        for unit in universe.iter() {
            unit.set_changed(false);
        }
    }
    for (id, unpublished) in side_table.drain() {
        let unit = universe.unit(id);
        unit.set_graph(unpublished.graph);
        if unpublished.newly_trivial {
            unit.set_trivial();
            stats.newly_trivial += 1;
        }
        if mark_changed {
            unit.set_changed(true);
        }
        for (&callee, &delta) in &unpublished.callsite_deltas {
            if let Some(target) = universe.get(callee) {
                target.adjust_callsites(delta);
            }
        }
        stats.published += 1;
    }
}
