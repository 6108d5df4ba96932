//! Per-root bookkeeping of inlining candidates
//!
//! Every root unit owns one [`CalleeTable`]. A record exists for a
//! (root, callee) pair while the pair has been evaluated and not yet
//! committed; committing removes it, and a later call site may recreate
//! it fresh.

use crate::universe::UnitId;
use std::collections::BTreeMap;

/// Depth-adjusted ranking score. The divisor grows by one for every four
/// levels below the first, so depths 1 to 4 rank undiscounted.
pub fn depth_adjusted(bc: f64, depth: u32) -> f64 {
    bc / f64::from(1 + depth.saturating_sub(1) / 4)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalleeRecord {
    /// Root graph cost when the speculative splice began
    pub size_before_inlining: u64,
    /// 1 for direct callees of the root, parent depth + 1 below that
    pub depth: u32,
    /// Benefit/cost priority, negative until first measured
    pub bc: f64,
    /// Round that last wrote `bc`
    pub last_round_updated: Option<u32>,
    /// Rejected as a target; skipped until the callee changes
    pub ignore: bool,
    /// Discovered under the round's target; promoted or discarded at the
    /// end of that round
    pub second_level: bool,
}

impl CalleeRecord {
    pub const UNMEASURED: f64 = -1.0;

    pub fn new(size_before_inlining: u64, depth: u32) -> Self {
        Self {
            size_before_inlining,
            depth,
            bc: Self::UNMEASURED,
            last_round_updated: None,
            ignore: false,
            second_level: false,
        }
    }

    pub fn is_measured(&self) -> bool {
        self.bc >= 0.0
    }

    pub fn priority(&self) -> f64 {
        depth_adjusted(self.bc, self.depth)
    }
}

/// The candidate a root tries to commit in the next round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineTarget {
    pub callee: UnitId,
    pub depth: u32,
}

/// Result of ranking one root's candidates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Selection {
    pub target: Option<InlineTarget>,
    /// Some candidate's callee changed and must be re-measured first
    pub any_changed: bool,
}

/// Candidate records of one root, ordered by callee handle so every
/// iteration is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalleeTable {
    records: BTreeMap<UnitId, CalleeRecord>,
}

impl CalleeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, callee: UnitId) -> bool {
        self.records.contains_key(&callee)
    }

    pub fn get(&self, callee: UnitId) -> Option<&CalleeRecord> {
        self.records.get(&callee)
    }

    pub fn get_mut(&mut self, callee: UnitId) -> Option<&mut CalleeRecord> {
        self.records.get_mut(&callee)
    }

    pub fn is_ignored(&self, callee: UnitId) -> bool {
        self.get(callee).is_some_and(|r| r.ignore)
    }

    /// Record the pre-splice size, creating the record if absent.
    pub fn record_size_before(
        &mut self,
        callee: UnitId,
        size: u64,
        depth: u32,
        second_level: bool,
    ) -> &mut CalleeRecord {
        let record = self.records.entry(callee).or_insert_with(|| CalleeRecord {
            second_level,
            ..CalleeRecord::new(size, depth)
        });
        record.size_before_inlining = size;
        record
    }

    pub fn remove(&mut self, callee: UnitId) -> Option<CalleeRecord> {
        self.records.remove(&callee)
    }

    pub fn iter(&self) -> impl Iterator<Item = (UnitId, &CalleeRecord)> {
        self.records.iter().map(|(&id, r)| (id, r))
    }

    /// The parent target was inlined: its callees are now direct candidates.
    pub fn promote_second_level(&mut self) {
        for record in self.records.values_mut() {
            record.second_level = false;
        }
    }

    /// The parent target was rejected: forget records found beneath it.
    pub fn discard_second_level(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| !r.second_level);
        before - self.records.len()
    }

    /// Pick the highest depth-adjusted priority among measured, non-ignored
    /// records. A record whose callee changed gets its `ignore` cleared and
    /// blocks selection for this round.
    pub fn select_target(&mut self, changed: impl Fn(UnitId) -> bool) -> Selection {
        let mut best: Option<(InlineTarget, f64)> = None;
        let mut any_changed = false;
        for (&callee, record) in self.records.iter_mut() {
            let callee_changed = changed(callee);
            if record.ignore && !callee_changed {
                continue;
            }
            if callee_changed {
                record.ignore = false;
                any_changed = true;
                continue;
            }
            if !record.is_measured() {
                continue;
            }
            let priority = record.priority();
            if best.map_or(true, |(_, p)| priority > p) {
                best = Some((
                    InlineTarget {
                        callee,
                        depth: record.depth,
                    },
                    priority,
                ));
            }
        }
        Selection {
            target: if any_changed { None } else { best.map(|(t, _)| t) },
            any_changed,
        }
    }
}
