//! Optimization suites run on final graphs before the backend
//!
//! Deoptimization targets must keep the shape the runtime expects to
//! resume into, so their suite skips constant folding.

use crate::ir::{canonicalize, eliminate_dead_code, Graph};
use crate::universe::{MethodUnit, Multiplicity};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuitePhase {
    Canonicalize,
    DeadCodeElimination,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suite {
    name: &'static str,
    phases: Vec<SuitePhase>,
}

impl Suite {
    pub fn regular() -> Self {
        Self {
            name: "regular",
            phases: vec![SuitePhase::Canonicalize, SuitePhase::DeadCodeElimination],
        }
    }

    pub fn deopt_target() -> Self {
        Self {
            name: "deopt-target",
            phases: vec![SuitePhase::DeadCodeElimination],
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn phases(&self) -> &[SuitePhase] {
        &self.phases
    }

    /// Run every phase in order. Returns the number of removed nodes.
    pub fn apply(&self, graph: &mut Graph) -> usize {
        self.phases
            .iter()
            .map(|phase| {
                let removed = match phase {
                    SuitePhase::Canonicalize => canonicalize(graph),
                    SuitePhase::DeadCodeElimination => eliminate_dead_code(graph),
                };
                trace!(target: "aotinline::queue::suites", suite = self.name, ?phase, removed);
                removed
            })
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suites {
    pub regular: Suite,
    pub deopt_target: Suite,
}

impl Default for Suites {
    fn default() -> Self {
        Self {
            regular: Suite::regular(),
            deopt_target: Suite::deopt_target(),
        }
    }
}

impl Suites {
    pub fn for_unit(&self, unit: &MethodUnit) -> &Suite {
        match unit.multiplicity() {
            Multiplicity::Original => &self.regular,
            Multiplicity::DeoptTarget => &self.deopt_target,
        }
    }
}
