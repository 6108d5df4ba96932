//! Arena graph with an undo log
//!
//! Every structural edit made while a transaction is open is recorded in
//! the undo log. Node creation is not logged: a rollback truncates the
//! arena back to the length recorded in the [`Mark`].
//!
//! ```text
//!   begin() ──► Mark { nodes, undo, level }
//!      │
//!      ├── add / set_next / set_input / delete ...   (logged)
//!      │
//!      ├── commit(mark)    keep edits, drop log when outermost
//!      └── rollback(mark)  replay log backwards, truncate arena
//! ```
//!
//! Transactions nest and must be closed in LIFO order.

use super::node::{Node, NodeId, NodeKind};
use smallvec::SmallVec;

/// Graph construction or rewriting failure.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    /// An edge points outside the arena or at a deleted node
    DanglingEdge { from: NodeId, to: NodeId },
    /// A live node consumes a deleted value
    DeletedInput { node: NodeId, input: NodeId },
    /// The start node is missing or deleted
    MissingStart,
    /// An edge violates the control-flow shape rules
    MalformedEdge { node: NodeId, reason: &'static str },
    /// Transactions closed out of order
    TransactionOrder { expected: u32, found: u32 },
    /// Node is not a live call
    NotACall(NodeId),
    /// Fixed node has no incoming control edge
    MissingPredecessor(NodeId),
    /// Call site passes the wrong number of arguments
    ArityMismatch {
        call: NodeId,
        expected: usize,
        got: usize,
    },
    /// Callee body cannot be spliced
    MalformedCallee(String),
    /// Control flow appended after a terminator
    Unreachable,
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DanglingEdge { from, to } => write!(f, "Dangling edge {} -> {}", from, to),
            Self::DeletedInput { node, input } => {
                write!(f, "Node {} uses deleted input {}", node, input)
            }
            Self::MissingStart => write!(f, "Graph has no live start node"),
            Self::MalformedEdge { node, reason } => {
                write!(f, "Malformed edge at {}: {}", node, reason)
            }
            Self::TransactionOrder { expected, found } => write!(
                f,
                "Transaction closed out of order: expected level {}, found {}",
                expected, found
            ),
            Self::NotACall(node) => write!(f, "Node {} is not a live call", node),
            Self::MissingPredecessor(node) => {
                write!(f, "Fixed node {} has no predecessor", node)
            }
            Self::ArityMismatch {
                call,
                expected,
                got,
            } => write!(
                f,
                "Call {} passes {} arguments, callee expects {}",
                call, got, expected
            ),
            Self::MalformedCallee(msg) => write!(f, "Malformed callee body: {}", msg),
            Self::Unreachable => write!(f, "Control flow appended after a terminator"),
        }
    }
}

impl std::error::Error for GraphError {}

pub type GraphResult<T> = Result<T, GraphError>;

/// Which outgoing control edge of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Next,
    Branch(usize),
    Exception,
}

/// Snapshot handle returned by [`Graph::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    nodes: usize,
    undo: usize,
    level: u32,
}

#[derive(Debug, Clone)]
enum Undo {
    Next(NodeId, Option<NodeId>),
    Branch(NodeId, usize, NodeId),
    Exception(NodeId, Option<NodeId>),
    Input(NodeId, usize, NodeId),
    Kind(NodeId, NodeKind),
    Deleted(NodeId),
}

#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    start: NodeId,
    undo: Vec<Undo>,
    open: u32,
}

impl PartialEq for Graph {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.nodes == other.nodes
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Create a graph holding only its start node.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(NodeKind::Start)],
            start: NodeId::new(0),
            undo: Vec::new(),
            open: 0,
        }
    }

    pub fn start(&self) -> NodeId {
        self.start
    }

    pub fn add(&mut self, node: Node) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// # Panics
    ///
    /// Panics if `id` is outside the arena.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Unlogged access for graph construction.
    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Live node lookup.
    pub fn live(&self, id: NodeId) -> Option<&Node> {
        self.get(id).filter(|n| !n.deleted)
    }

    /// Arena length, including deleted nodes.
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    pub fn live_count(&self) -> usize {
        self.nodes.iter().filter(|n| !n.deleted).count()
    }

    pub fn live_nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.deleted)
            .map(|(i, n)| (NodeId::new(i), n))
    }

    /// Live call nodes in id order.
    pub fn call_sites(&self) -> Vec<NodeId> {
        self.live_nodes()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Call(_)))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn invoke_count(&self) -> usize {
        self.live_nodes()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Call(_)))
            .count()
    }

    // ========================================================================
    // Logged edits
    // ========================================================================

    fn log(&mut self, entry: Undo) {
        if self.open > 0 {
            self.undo.push(entry);
        }
    }

    pub fn set_next(&mut self, id: NodeId, next: Option<NodeId>) {
        let old = std::mem::replace(&mut self.nodes[id.index()].next, next);
        self.log(Undo::Next(id, old));
    }

    pub fn set_branch(&mut self, id: NodeId, index: usize, target: NodeId) {
        let old = std::mem::replace(&mut self.nodes[id.index()].branches[index], target);
        self.log(Undo::Branch(id, index, old));
    }

    pub fn set_exception(&mut self, id: NodeId, target: Option<NodeId>) {
        let old = std::mem::replace(&mut self.nodes[id.index()].exception, target);
        self.log(Undo::Exception(id, old));
    }

    pub fn set_input(&mut self, id: NodeId, index: usize, value: NodeId) {
        let old = std::mem::replace(&mut self.nodes[id.index()].inputs[index], value);
        self.log(Undo::Input(id, index, old));
    }

    pub fn set_kind(&mut self, id: NodeId, kind: NodeKind) {
        let old = std::mem::replace(&mut self.nodes[id.index()].kind, kind);
        self.log(Undo::Kind(id, old));
    }

    pub fn delete(&mut self, id: NodeId) {
        if !self.nodes[id.index()].deleted {
            self.nodes[id.index()].deleted = true;
            self.log(Undo::Deleted(id));
        }
    }

    /// Point `edge` of `from` at `target`.
    pub fn redirect(&mut self, from: NodeId, edge: Edge, target: NodeId) {
        match edge {
            Edge::Next => self.set_next(from, Some(target)),
            Edge::Branch(index) => self.set_branch(from, index, target),
            Edge::Exception => self.set_exception(from, Some(target)),
        }
    }

    /// The single live control predecessor of a fixed node.
    pub fn predecessor(&self, id: NodeId) -> Option<(NodeId, Edge)> {
        self.live_nodes().find_map(|(from, node)| {
            if node.next == Some(id) && !node.kind.is_end() {
                return Some((from, Edge::Next));
            }
            if let Some(index) = node.branches.iter().position(|&b| b == id) {
                return Some((from, Edge::Branch(index)));
            }
            (node.exception == Some(id)).then_some((from, Edge::Exception))
        })
    }

    /// Rewire every live data use of `old` to `new`. Returns the number of
    /// rewritten inputs.
    pub fn replace_usages(&mut self, old: NodeId, new: NodeId) -> usize {
        let mut sites: Vec<(NodeId, usize)> = Vec::new();
        for (id, node) in self.live_nodes() {
            for (index, &input) in node.inputs.iter().enumerate() {
                if input == old {
                    sites.push((id, index));
                }
            }
        }
        for &(id, index) in &sites {
            self.set_input(id, index, new);
        }
        sites.len()
    }

    pub fn usage_count(&self, id: NodeId) -> usize {
        self.live_nodes()
            .map(|(_, n)| n.inputs.iter().filter(|&&i| i == id).count())
            .sum()
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    pub fn begin(&mut self) -> Mark {
        self.open += 1;
        Mark {
            nodes: self.nodes.len(),
            undo: self.undo.len(),
            level: self.open,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.open > 0
    }

    fn close(&mut self, mark: &Mark) -> GraphResult<()> {
        if mark.level != self.open {
            return Err(GraphError::TransactionOrder {
                expected: self.open,
                found: mark.level,
            });
        }
        self.open -= 1;
        Ok(())
    }

    /// Keep every edit since `mark`.
    pub fn commit(&mut self, mark: Mark) -> GraphResult<()> {
        self.close(&mark)?;
        if self.open == 0 {
            self.undo.clear();
        }
        Ok(())
    }

    /// Undo every edit since `mark` and drop the nodes created after it.
    pub fn rollback(&mut self, mark: Mark) -> GraphResult<()> {
        self.close(&mark)?;
        while self.undo.len() > mark.undo {
            let Some(entry) = self.undo.pop() else { break };
            match entry {
                Undo::Next(id, old) => self.nodes[id.index()].next = old,
                Undo::Branch(id, index, old) => self.nodes[id.index()].branches[index] = old,
                Undo::Exception(id, old) => self.nodes[id.index()].exception = old,
                Undo::Input(id, index, old) => self.nodes[id.index()].inputs[index] = old,
                Undo::Kind(id, old) => self.nodes[id.index()].kind = old,
                Undo::Deleted(id) => self.nodes[id.index()].deleted = false,
            }
        }
        self.nodes.truncate(mark.nodes);
        Ok(())
    }

    // ========================================================================
    // Checking and encoding
    // ========================================================================

    fn check_edge(&self, from: NodeId, to: NodeId) -> GraphResult<&Node> {
        self.live(to).ok_or(GraphError::DanglingEdge { from, to })
    }

    /// Structural well-formedness check.
    pub fn verify(&self) -> GraphResult<()> {
        match self.live(self.start) {
            Some(node) if node.kind == NodeKind::Start => {}
            _ => return Err(GraphError::MissingStart),
        }
        for (id, node) in self.live_nodes() {
            for &input in &node.inputs {
                match self.get(input) {
                    None => return Err(GraphError::DanglingEdge { from: id, to: input }),
                    Some(n) if n.deleted => {
                        return Err(GraphError::DeletedInput { node: id, input })
                    }
                    Some(_) => {}
                }
            }
            for succ in node.successors() {
                let target = self.check_edge(id, succ)?;
                if !target.kind.is_fixed() {
                    return Err(GraphError::MalformedEdge {
                        node: id,
                        reason: "control edge to a floating node",
                    });
                }
            }
            match node.kind {
                NodeKind::End | NodeKind::LoopEnd => {
                    let merge = node.next.and_then(|m| self.live(m));
                    if !merge.is_some_and(|m| m.kind.is_merge()) {
                        return Err(GraphError::MalformedEdge {
                            node: id,
                            reason: "end does not flow into a merge",
                        });
                    }
                }
                NodeKind::If if node.branches.len() != 2 => {
                    return Err(GraphError::MalformedEdge {
                        node: id,
                        reason: "if needs exactly two branches",
                    });
                }
                NodeKind::Phi => {
                    let merge = node.inputs.first().and_then(|&m| self.live(m));
                    if !merge.is_some_and(|m| m.kind.is_merge()) {
                        return Err(GraphError::MalformedEdge {
                            node: id,
                            reason: "phi is not anchored at a merge",
                        });
                    }
                }
                NodeKind::Call(_) => {
                    if let Some(handler) = node.exception {
                        if self.node(handler).kind != NodeKind::ExceptionObject {
                            return Err(GraphError::MalformedEdge {
                                node: id,
                                reason: "exception edge must reach an exception object",
                            });
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Compacted copy without deleted nodes and without transaction state.
    pub fn encode(&self) -> GraphResult<Graph> {
        let mut remap: Vec<Option<NodeId>> = vec![None; self.nodes.len()];
        let mut live = 0usize;
        for (index, node) in self.nodes.iter().enumerate() {
            if !node.deleted {
                remap[index] = Some(NodeId::new(live));
                live += 1;
            }
        }
        let map = |from: NodeId, to: NodeId| -> GraphResult<NodeId> {
            remap
                .get(to.index())
                .copied()
                .flatten()
                .ok_or(GraphError::DanglingEdge { from, to })
        };

        let mut nodes = Vec::with_capacity(live);
        for (id, node) in self.live_nodes() {
            let inputs = node
                .inputs
                .iter()
                .map(|&i| map(id, i))
                .collect::<GraphResult<SmallVec<_>>>()?;
            let branches = node
                .branches
                .iter()
                .map(|&b| map(id, b))
                .collect::<GraphResult<SmallVec<_>>>()?;
            nodes.push(Node {
                kind: node.kind,
                inputs,
                next: node.next.map(|n| map(id, n)).transpose()?,
                branches,
                exception: node.exception.map(|e| map(id, e)).transpose()?,
                deleted: false,
            });
        }
        let start = remap
            .get(self.start.index())
            .copied()
            .flatten()
            .ok_or(GraphError::MissingStart)?;
        Ok(Graph {
            nodes,
            start,
            undo: Vec::new(),
            open: 0,
        })
    }

    /// Fixed nodes reachable from start through control edges.
    pub fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![self.start];
        while let Some(id) = stack.pop() {
            let Some(node) = self.live(id) else { continue };
            if std::mem::replace(&mut seen[id.index()], true) {
                continue;
            }
            stack.extend(node.successors());
        }
        seen
    }
}
