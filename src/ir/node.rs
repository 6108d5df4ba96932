//! IR node definitions
//!
//! Nodes are either *fixed* (part of the control chain, linked through
//! `next`, branch and exception edges) or *floating* (pure values whose
//! position is determined only by their data inputs).
//!
//! | Kind              | Class      | Inputs                      | Control edges          |
//! |-------------------|------------|-----------------------------|------------------------|
//! | `Start`           | fixed      | -                           | `next`                 |
//! | `Parameter(i)`    | floating   | -                           | -                      |
//! | `FrameState`      | floating   | captured values             | -                      |
//! | `Constant(v)`     | floating   | -                           | -                      |
//! | `Arith`/`Compare` | floating   | `[lhs, rhs]`                | -                      |
//! | `Phi`             | floating   | `[merge, v0, v1, ..]`       | -                      |
//! | `Memory(op)`      | fixed      | `[address]` / `[address, value]` | `next`            |
//! | `Call(target)`    | fixed      | arguments                   | `next`, `exception`    |
//! | `If`              | fixed      | `[condition]`               | `branches[0..2]`       |
//! | `End`/`LoopEnd`   | fixed      | -                           | `next` = merge / loop  |
//! | `Merge`/`LoopBegin` | fixed    | -                           | `next`                 |
//! | `ExceptionObject` | fixed      | -                           | `next`                 |
//! | `Return`          | sink       | `[value]` or `[]`           | -                      |
//! | `Unwind`          | sink       | `[exception]`               | -                      |

use crate::universe::UnitId;
use smallvec::SmallVec;
use std::fmt;

/// Handle of a node inside one [`Graph`](super::Graph) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(index: usize) -> Self {
        NodeId(index as u32)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Shl,
}

impl ArithOp {
    /// Fold two constants. Returns `None` when the operation would trap.
    pub fn fold(self, a: i64, b: i64) -> Option<i64> {
        match self {
            ArithOp::Add => Some(a.wrapping_add(b)),
            ArithOp::Sub => Some(a.wrapping_sub(b)),
            ArithOp::Mul => Some(a.wrapping_mul(b)),
            ArithOp::Div => a.checked_div(b),
            ArithOp::And => Some(a & b),
            ArithOp::Or => Some(a | b),
            ArithOp::Xor => Some(a ^ b),
            ArithOp::Shl => Some(a.wrapping_shl((b & 63) as u32)),
        }
    }
}

/// Comparison operators, producing 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
}

impl CmpOp {
    pub fn fold(self, a: i64, b: i64) -> i64 {
        let result = match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
        };
        result as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    Load,
    Store,
}

/// How a call site dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Statically bound; the only kind that can be inlined.
    Direct,
    /// Dispatched through the method resolution oracle.
    Virtual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallTarget {
    pub method: UnitId,
    pub kind: CallKind,
}

impl CallTarget {
    pub fn direct(method: UnitId) -> Self {
        Self {
            method,
            kind: CallKind::Direct,
        }
    }

    pub fn virtual_call(method: UnitId) -> Self {
        Self {
            method,
            kind: CallKind::Virtual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Start,
    Parameter(u16),
    FrameState,
    Constant(i64),
    Arith(ArithOp),
    Compare(CmpOp),
    Memory(MemoryOp),
    Call(CallTarget),
    If,
    End,
    Merge,
    Phi,
    LoopBegin,
    LoopEnd,
    Return,
    Unwind,
    ExceptionObject,
}

impl NodeKind {
    /// Part of the control chain.
    pub fn is_fixed(&self) -> bool {
        !matches!(
            self,
            NodeKind::Parameter(_)
                | NodeKind::FrameState
                | NodeKind::Constant(_)
                | NodeKind::Arith(_)
                | NodeKind::Compare(_)
                | NodeKind::Phi
        )
    }

    /// Ends a control path inside the method.
    pub fn is_control_sink(&self) -> bool {
        matches!(self, NodeKind::Return | NodeKind::Unwind)
    }

    /// Transfers control to a merge point through `next`.
    pub fn is_end(&self) -> bool {
        matches!(self, NodeKind::End | NodeKind::LoopEnd)
    }

    pub fn is_merge(&self) -> bool {
        matches!(self, NodeKind::Merge | NodeKind::LoopBegin)
    }

    /// Structural markers that carry no executable work.
    pub fn is_bookkeeping(&self) -> bool {
        matches!(
            self,
            NodeKind::Start | NodeKind::Parameter(_) | NodeKind::FrameState
        )
    }

    pub fn call_target(&self) -> Option<CallTarget> {
        match self {
            NodeKind::Call(target) => Some(*target),
            _ => None,
        }
    }
}

/// One IR node. Edges are stored on the node that owns them.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub inputs: SmallVec<[NodeId; 4]>,
    pub next: Option<NodeId>,
    pub branches: SmallVec<[NodeId; 2]>,
    pub exception: Option<NodeId>,
    pub deleted: bool,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            inputs: SmallVec::new(),
            next: None,
            branches: SmallVec::new(),
            exception: None,
            deleted: false,
        }
    }

    pub fn with_inputs(kind: NodeKind, inputs: &[NodeId]) -> Self {
        Self {
            inputs: SmallVec::from_slice(inputs),
            ..Self::new(kind)
        }
    }

    /// All control successors, in edge order (`next`, branches, exception).
    pub fn successors(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.next
            .iter()
            .copied()
            .chain(self.branches.iter().copied())
            .chain(self.exception.iter().copied())
    }
}
