//! The method universe
//!
//! Units are stored in an arena and addressed by [`UnitId`] handles, so
//! cross-thread references never depend on pointer identity. Per-unit
//! mutable state is split by who writes it:
//!
//! | Field                         | Written by                           |
//! |-------------------------------|--------------------------------------|
//! | `graph`                       | publish step (after the barrier)     |
//! | `trivial`, `has_changed`      | publish step                         |
//! | `halted`                      | owning task or sequential recompute  |
//! | `state` (callee records)      | owning task or sequential recompute  |
//! | `callsites`                   | sequential count and publish step    |
//! | compile counters              | compile tasks (atomics)              |

use crate::inlining::InliningState;
use crate::ir::Graph;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u32);

impl UnitId {
    pub fn new(index: usize) -> Self {
        UnitId(index as u32)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// Which variant of a method body a unit compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Multiplicity {
    Original,
    DeoptTarget,
}

impl fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Multiplicity::Original => write!(f, "original"),
            Multiplicity::DeoptTarget => write!(f, "deopt-target"),
        }
    }
}

/// Externally supplied directives for one method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodFlags {
    pub entry_point: bool,
    pub always_inline: bool,
    pub never_inline: bool,
}

/// Why a unit was compiled, counted per unit for the histogram.
#[derive(Debug, Default)]
pub struct CompileCounters {
    pub entry_point: AtomicU32,
    pub direct_calls: AtomicU32,
    pub virtual_calls: AtomicU32,
    pub nodes_after_parsing: AtomicUsize,
    pub nodes_before_compile: AtomicUsize,
    pub nodes_after_compile: AtomicUsize,
}

pub struct MethodUnit {
    id: UnitId,
    name: String,
    param_count: u16,
    multiplicity: Multiplicity,
    flags: MethodFlags,
    /// Original unit this deopt target is derived from
    original: Option<UnitId>,
    deopt_target: Option<UnitId>,
    graph: RwLock<Option<Arc<Graph>>>,
    trivial: AtomicBool,
    trivial_inlining_disabled: AtomicBool,
    has_changed: AtomicBool,
    halted: AtomicBool,
    in_parse_queue: AtomicBool,
    callsites: AtomicU32,
    state: Mutex<InliningState>,
    pub counters: CompileCounters,
}

impl fmt::Debug for MethodUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodUnit")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("multiplicity", &self.multiplicity)
            .field("trivial", &self.is_trivial())
            .field("halted", &self.is_halted())
            .field("callsites", &self.callsites())
            .finish()
    }
}

impl MethodUnit {
    fn new(id: UnitId, name: String, param_count: u16, flags: MethodFlags) -> Self {
        Self {
            id,
            name,
            param_count,
            multiplicity: Multiplicity::Original,
            flags,
            original: None,
            deopt_target: None,
            graph: RwLock::new(None),
            trivial: AtomicBool::new(false),
            trivial_inlining_disabled: AtomicBool::new(false),
            has_changed: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            in_parse_queue: AtomicBool::new(false),
            callsites: AtomicU32::new(0),
            state: Mutex::new(InliningState::default()),
            counters: CompileCounters::default(),
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_count(&self) -> u16 {
        self.param_count
    }

    pub fn multiplicity(&self) -> Multiplicity {
        self.multiplicity
    }

    pub fn flags(&self) -> MethodFlags {
        self.flags
    }

    pub fn original(&self) -> Option<UnitId> {
        self.original
    }

    pub fn deopt_target(&self) -> Option<UnitId> {
        self.deopt_target
    }

    /// Display name including the multiplicity suffix.
    pub fn qualified_name(&self) -> String {
        match self.multiplicity {
            Multiplicity::Original => self.name.clone(),
            Multiplicity::DeoptTarget => format!("{}@deopt", self.name),
        }
    }

    // ========================================================================
    // Graph
    // ========================================================================

    pub fn graph(&self) -> Option<Arc<Graph>> {
        self.graph.read().clone()
    }

    pub fn has_graph(&self) -> bool {
        self.graph.read().is_some()
    }

    pub(crate) fn set_graph(&self, graph: Graph) {
        *self.graph.write() = Some(Arc::new(graph));
    }

    // ========================================================================
    // Flags
    // ========================================================================

    pub fn is_trivial(&self) -> bool {
        self.trivial.load(Ordering::Acquire)
    }

    pub(crate) fn set_trivial(&self) {
        self.trivial.store(true, Ordering::Release);
    }

    pub fn trivial_inlining_disabled(&self) -> bool {
        self.trivial_inlining_disabled.load(Ordering::Acquire)
    }

    /// Returns `true` if this call disabled it.
    pub(crate) fn disable_trivial_inlining(&self) -> bool {
        !self.trivial_inlining_disabled.swap(true, Ordering::AcqRel)
    }

    /// Published a new graph at the end of the previous round.
    pub fn has_changed(&self) -> bool {
        self.has_changed.load(Ordering::Acquire)
    }

    pub(crate) fn set_changed(&self, changed: bool) {
        self.has_changed.store(changed, Ordering::Release);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    pub(crate) fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    /// Returns `true` the first time, so each unit is queued once.
    pub(crate) fn claim_parse(&self) -> bool {
        !self.in_parse_queue.swap(true, Ordering::AcqRel)
    }

    pub fn is_parse_claimed(&self) -> bool {
        self.in_parse_queue.load(Ordering::Acquire)
    }

    // ========================================================================
    // Counters and inlining state
    // ========================================================================

    pub fn callsites(&self) -> u32 {
        self.callsites.load(Ordering::Acquire)
    }

    pub(crate) fn set_callsites(&self, count: u32) {
        self.callsites.store(count, Ordering::Release);
    }

    pub(crate) fn adjust_callsites(&self, delta: i32) {
        let current = self.callsites();
        self.set_callsites(current.saturating_add_signed(delta));
    }

    pub fn lock_state(&self) -> MutexGuard<'_, InliningState> {
        self.state.lock()
    }
}

/// Arena of all method units of one compilation.
#[derive(Debug, Default)]
pub struct Universe {
    units: Vec<MethodUnit>,
    by_name: HashMap<String, UnitId>,
}

impl Universe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an original method. Names are unique.
    pub fn add_method(
        &mut self,
        name: impl Into<String>,
        param_count: u16,
        flags: MethodFlags,
    ) -> Option<UnitId> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return None;
        }
        let id = UnitId::new(self.units.len());
        self.by_name.insert(name.clone(), id);
        self.units.push(MethodUnit::new(id, name, param_count, flags));
        Some(id)
    }

    /// Register the deoptimization-target variant of `original`, or return
    /// the existing one.
    pub fn add_deopt_target(&mut self, original: UnitId) -> Option<UnitId> {
        let source = self.units.get(original.index())?;
        if let Some(existing) = source.deopt_target {
            return Some(existing);
        }
        let id = UnitId::new(self.units.len());
        let mut unit = MethodUnit::new(
            id,
            source.name.clone(),
            source.param_count,
            MethodFlags {
                entry_point: false,
                ..source.flags
            },
        );
        unit.multiplicity = Multiplicity::DeoptTarget;
        unit.original = Some(original);
        self.units.push(unit);
        self.units[original.index()].deopt_target = Some(id);
        Some(id)
    }

    pub fn get(&self, id: UnitId) -> Option<&MethodUnit> {
        self.units.get(id.index())
    }

    /// # Panics
    ///
    /// Panics if `id` was not issued by this universe.
    pub fn unit(&self, id: UnitId) -> &MethodUnit {
        &self.units[id.index()]
    }

    pub fn lookup(&self, name: &str) -> Option<UnitId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MethodUnit> {
        self.units.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = UnitId> {
        (0..self.units.len()).map(UnitId::new)
    }

    /// Units that currently hold a graph, in handle order.
    pub fn units_with_graph(&self) -> Vec<UnitId> {
        self.units
            .iter()
            .filter(|u| u.has_graph())
            .map(|u| u.id)
            .collect()
    }

    pub fn entry_points(&self) -> Vec<UnitId> {
        self.units
            .iter()
            .filter(|u| u.multiplicity == Multiplicity::Original && u.flags.entry_point)
            .map(|u| u.id)
            .collect()
    }

    pub fn deopt_targets(&self) -> Vec<UnitId> {
        self.units
            .iter()
            .filter(|u| u.multiplicity == Multiplicity::DeoptTarget)
            .map(|u| u.id)
            .collect()
    }
}
