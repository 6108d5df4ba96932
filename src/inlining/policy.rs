//! Inlining decisions
//!
//! [`Policy`] is a closed set of decision procedures, one per scheduler
//! phase. Each answers two questions for a call site met while decoding a
//! root's body:
//!
//! 1. [`Policy::admits`]: is the site worth a speculative splice at all?
//! 2. [`Policy::decide`]: once the splice scope has been decoded, is it
//!    kept ([`Decision::Commit`]) or rolled back ([`Decision::Reject`])?
//!
//! Non-trivial decisions go through a [`PriorityStrategy`]; the default
//! [`BenefitCostStrategy`] implements
//!
//! ```text
//!   bc        = (offset + improvedStamps + benefit) * callsites(root)^2 / calleeCost
//!   threshold = t1 * 2^(calleeCost / (16 * t2))
//!                  * (1 + inlinedBytes / 1000) * (1 + inlinedCount / 10)
//! ```
//!
//! where `calleeCost` is the size growth of the splice, divided by the
//! leaf divisor when the copied body has no calls.

use super::callee::{depth_adjusted, InlineTarget};
use super::InliningState;
use super::InliningError;
use crate::config::InliningConfig;
use crate::universe::{UnitId, Universe};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// How far from the round's root a call site sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvaluationDepth {
    Root,
    FirstLevel,
    SecondLevel,
}

impl EvaluationDepth {
    /// The depth of call sites inside a scope at this depth, if evaluated.
    pub fn deeper(self) -> Option<Self> {
        match self {
            EvaluationDepth::Root => Some(EvaluationDepth::FirstLevel),
            EvaluationDepth::FirstLevel => Some(EvaluationDepth::SecondLevel),
            EvaluationDepth::SecondLevel => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Commit,
    Reject,
}

/// A call site as seen by the policy.
#[derive(Debug, Clone, Copy)]
pub struct SiteContext<'a> {
    pub universe: &'a Universe,
    pub root: UnitId,
    /// Unit whose body contains the call (the root or a first-level callee)
    pub caller: UnitId,
    pub callee: UnitId,
    pub depth: EvaluationDepth,
    /// The enclosing scope is this round's marked target
    pub parent_is_target: bool,
    pub round: u32,
}

/// Per-decode facts shared by every decision of one root in one round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeState {
    pub target: Option<InlineTarget>,
    pub target_committed: bool,
}

impl DecodeState {
    pub fn new(target: Option<InlineTarget>) -> Self {
        Self {
            target,
            target_committed: false,
        }
    }

    /// `callee` is the target and nothing has been committed yet.
    pub fn is_open_target(&self, callee: UnitId) -> bool {
        !self.target_committed && self.target.is_some_and(|t| t.callee == callee)
    }
}

/// Size facts about one decoded speculative scope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScopeMeasurement {
    pub current_size: u64,
    pub size_before: u64,
    pub invokes: usize,
    pub improved_stamps: usize,
    pub benefit: usize,
}

impl ScopeMeasurement {
    pub fn growth(&self) -> f64 {
        self.current_size as f64 - self.size_before as f64
    }
}

/// Replaceable benefit/cost arithmetic of the non-trivial phase.
pub trait PriorityStrategy: Send + Sync + fmt::Debug {
    fn callee_cost(&self, m: &ScopeMeasurement) -> f64;

    fn priority(&self, m: &ScopeMeasurement, callee_cost: f64, root_callsites: u32) -> f64;

    fn threshold(&self, callee_cost: f64, inlined_bytes: u64, inlined_count: u32) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenefitCostStrategy {
    pub offset: f64,
    pub t1: f64,
    pub t2: f64,
    pub leaf_cost_divisor: f64,
}

impl BenefitCostStrategy {
    /// Smallest cost used as a divisor, so shrinking splices stay finite.
    pub const MIN_COST: f64 = 0.25;
}

impl Default for BenefitCostStrategy {
    fn default() -> Self {
        Self::from(&InliningConfig::default())
    }
}

impl From<&InliningConfig> for BenefitCostStrategy {
    fn from(config: &InliningConfig) -> Self {
        Self {
            offset: config.offset,
            t1: config.t1,
            t2: config.t2,
            leaf_cost_divisor: config.leaf_cost_divisor,
        }
    }
}

impl PriorityStrategy for BenefitCostStrategy {
    fn callee_cost(&self, m: &ScopeMeasurement) -> f64 {
        let mut cost = m.growth();
        if m.invokes == 0 {
            cost /= self.leaf_cost_divisor;
        }
        cost.max(Self::MIN_COST)
    }

    fn priority(&self, m: &ScopeMeasurement, callee_cost: f64, root_callsites: u32) -> f64 {
        let callsites = root_callsites as f64;
        (self.offset + m.improved_stamps as f64 + m.benefit as f64) * callsites * callsites
            / callee_cost
    }

    fn threshold(&self, callee_cost: f64, inlined_bytes: u64, inlined_count: u32) -> f64 {
        self.t1
            * (callee_cost / (16.0 * self.t2)).exp2()
            * (1.0 + inlined_bytes as f64 / 1000.0)
            * (1.0 + inlined_count as f64 / 10.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrivialPolicy {
    /// Inline trivial callees; always-inline callees are inlined regardless
    pub inline_trivial: bool,
}

#[derive(Debug, Clone)]
pub struct NonTrivialPolicy {
    strategy: Arc<dyn PriorityStrategy>,
}

impl NonTrivialPolicy {
    pub fn new(strategy: Arc<dyn PriorityStrategy>) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &dyn PriorityStrategy {
        self.strategy.as_ref()
    }
}

#[derive(Debug, Clone)]
pub enum Policy {
    Trivial(TrivialPolicy),
    NonTrivial(NonTrivialPolicy),
}

impl Policy {
    pub fn trivial(config: &InliningConfig) -> Self {
        Policy::Trivial(TrivialPolicy {
            inline_trivial: config.aot_trivial_inline,
        })
    }

    pub fn non_trivial(config: &InliningConfig) -> Self {
        Policy::NonTrivial(NonTrivialPolicy::new(Arc::new(
            BenefitCostStrategy::from(config),
        )))
    }

    /// Whether the policy keeps candidate records.
    pub fn tracks_candidates(&self) -> bool {
        matches!(self, Policy::NonTrivial(_))
    }

    /// Gate applied before a speculative splice.
    pub fn admits(&self, site: &SiteContext<'_>, state: &InliningState, decode: &DecodeState) -> bool {
        let Some(callee) = site.universe.get(site.callee) else {
            return false;
        };
        // A unit is never spliced into itself, directly or one level down.
        if site.callee == site.root || site.callee == site.caller {
            return false;
        }
        if !callee.has_graph() || callee.flags().never_inline {
            return false;
        }

        match self {
            Policy::Trivial(policy) => {
                if site.depth != EvaluationDepth::FirstLevel {
                    return false;
                }
                if callee.flags().always_inline {
                    return true;
                }
                let root_disabled = site
                    .universe
                    .get(site.root)
                    .is_some_and(|r| r.trivial_inlining_disabled());
                policy.inline_trivial && callee.is_trivial() && !root_disabled
            }
            Policy::NonTrivial(_) => {
                if callee.flags().always_inline && site.depth != EvaluationDepth::Root {
                    return true;
                }
                let root_halted = site.universe.get(site.root).is_some_and(|r| r.is_halted());
                if root_halted || state.callees.is_ignored(site.callee) {
                    return false;
                }
                match site.depth {
                    EvaluationDepth::Root => false,
                    EvaluationDepth::FirstLevel => {
                        if decode.is_open_target(site.callee) {
                            return true;
                        }
                        // Cached measurement is still valid.
                        !(state.callees.contains(site.callee) && !callee.has_changed())
                    }
                    EvaluationDepth::SecondLevel => site.parent_is_target,
                }
            }
        }
    }

    /// Verdict for a decoded speculative scope. Commits update the root's
    /// counters and drop the committed record; rejected measurements
    /// refresh the candidate's priority.
    pub fn decide(
        &self,
        site: &SiteContext<'_>,
        measurement: &ScopeMeasurement,
        state: &mut InliningState,
        decode: &mut DecodeState,
    ) -> Result<Decision, InliningError> {
        let policy = match self {
            Policy::Trivial(_) => return Ok(Decision::Commit),
            Policy::NonTrivial(policy) => policy,
        };
        let universe = site.universe;
        let callee = universe
            .get(site.callee)
            .ok_or(InliningError::MissingGraph(site.callee))?;
        if callee.flags().always_inline {
            state.callees.remove(site.callee);
            return Ok(Decision::Commit);
        }
        if !state.callees.contains(site.callee) {
            return Err(InliningError::MissingCalleeRecord {
                root: site.root,
                callee: site.callee,
            });
        }

        let strategy = policy.strategy();
        let root_callsites = universe.get(site.root).map_or(0, |r| r.callsites());
        let cost = strategy.callee_cost(measurement);
        let bc = strategy.priority(measurement, cost, root_callsites);

        if site.depth == EvaluationDepth::FirstLevel && decode.is_open_target(site.callee) {
            let threshold = strategy.threshold(cost, state.inlined_bytes, state.inlined_count);
            trace!(
                target: "aotinline::inlining::policy",
                root = %site.root,
                callee = %site.callee,
                round = site.round,
                bc,
                threshold,
                cost,
                "Target evaluated"
            );
            if bc >= threshold {
                state.inlined_bytes += measurement.growth().max(0.0) as u64;
                state.inlined_count += 1;
                state.callees.remove(site.callee);
                decode.target_committed = true;
                debug!(
                    target: "aotinline::inlining::policy",
                    root = %site.root,
                    callee = %site.callee,
                    round = site.round,
                    bc,
                    threshold,
                    "Commit"
                );
                return Ok(Decision::Commit);
            }
            debug!(
                target: "aotinline::inlining::policy",
                root = %site.root,
                callee = %site.callee,
                round = site.round,
                bc,
                threshold,
                "Reject below threshold"
            );
            return Ok(Decision::Reject);
        }

        // Measurement only. Within one round the least promising call site
        // of a callee determines its score.
        let round = site.round;
        let Some(record) = state.callees.get_mut(site.callee) else {
            return Err(InliningError::MissingCalleeRecord {
                root: site.root,
                callee: site.callee,
            });
        };
        let update = record.last_round_updated != Some(round)
            || depth_adjusted(bc, record.depth) < record.priority();
        if update {
            record.bc = bc;
            record.last_round_updated = Some(round);
        }
        trace!(
            target: "aotinline::inlining::policy",
            root = %site.root,
            callee = %site.callee,
            round,
            bc,
            depth = record.depth,
            updated = update,
            "Measured"
        );
        Ok(Decision::Reject)
    }
}
