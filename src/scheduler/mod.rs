//! Round-based inlining scheduler
//!
//! Drives the trivial phase and then the non-trivial phase over the whole
//! universe. Both phases follow the same discipline:
//!
//! - unit tasks run in parallel on the [`TaskExecutor`] and only write
//!   their own unit's state and side-table slot;
//! - the universe's graphs and cross-unit flags change only in the publish
//!   step, after every task of the round has joined.

mod executor;
mod non_trivial;
mod round;
mod trivial;


pub use executor::TaskExecutor;
pub use round::{Phase, PhaseReport, RoundContext, RoundStats, SideTable, Unpublished};

use crate::config::InliningConfig;
use crate::error::SchedulerResult;
use crate::inlining::GraphCostModel;
use crate::universe::Universe;

/// Reports of both inlining phases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub trivial: PhaseReport,
    pub non_trivial: PhaseReport,
}

pub struct RoundScheduler<'a> {
    universe: &'a Universe,
    config: &'a InliningConfig,
    executor: &'a TaskExecutor,
    cost: GraphCostModel,
}

impl<'a> RoundScheduler<'a> {
    pub fn new(universe: &'a Universe, config: &'a InliningConfig, executor: &'a TaskExecutor) -> Self {
        Self {
            universe,
            config,
            executor,
            cost: GraphCostModel,
        }
    }

    /// Trivial phase to its fixpoint, then non-trivial phase until every
    /// unit has halted.
    pub fn run(&self) -> SchedulerResult<ScheduleReport> {
        let trivial = self.run_trivial_phase()?;
        let non_trivial = self.run_non_trivial_phase()?;
        Ok(ScheduleReport {
            trivial,
            non_trivial,
        })
    }
}
