//! Fluent construction of method bodies.
//!
//! The builder keeps a *tail*: the control edge the next fixed node is
//! linked to. Terminators (`ret`, `unwind`, `end`, `loop_end`, `if_node`)
//! close the tail; `enter` reopens it at a branch or handler.

use super::graph::{Edge, Graph, GraphError, GraphResult};
use super::node::{ArithOp, CallTarget, CmpOp, MemoryOp, Node, NodeId, NodeKind};

pub struct GraphBuilder {
    graph: Graph,
    params: Vec<NodeId>,
    tail: Option<(NodeId, Edge)>,
}

impl GraphBuilder {
    pub fn new(param_count: u16) -> Self {
        let mut graph = Graph::new();
        let params = (0..param_count)
            .map(|i| graph.add(Node::new(NodeKind::Parameter(i))))
            .collect();
        let tail = Some((graph.start(), Edge::Next));
        Self {
            graph,
            params,
            tail,
        }
    }

    pub fn param(&self, index: usize) -> Option<NodeId> {
        self.params.get(index).copied()
    }

    pub fn params(&self) -> &[NodeId] {
        &self.params
    }

    /// Whether control can still reach the tail.
    pub fn is_open(&self) -> bool {
        self.tail.is_some()
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    // ========================================================================
    // Floating values
    // ========================================================================

    pub fn constant(&mut self, value: i64) -> NodeId {
        self.graph.add(Node::new(NodeKind::Constant(value)))
    }

    pub fn arith(&mut self, op: ArithOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.graph
            .add(Node::with_inputs(NodeKind::Arith(op), &[lhs, rhs]))
    }

    pub fn compare(&mut self, op: CmpOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.graph
            .add(Node::with_inputs(NodeKind::Compare(op), &[lhs, rhs]))
    }

    pub fn frame_state(&mut self, values: &[NodeId]) -> NodeId {
        self.graph
            .add(Node::with_inputs(NodeKind::FrameState, values))
    }

    pub fn phi(&mut self, merge: NodeId, values: &[NodeId]) -> NodeId {
        let mut inputs = Vec::with_capacity(values.len() + 1);
        inputs.push(merge);
        inputs.extend_from_slice(values);
        self.graph.add(Node::with_inputs(NodeKind::Phi, &inputs))
    }

    // ========================================================================
    // Control
    // ========================================================================

    fn link(&mut self, from: NodeId, edge: Edge, to: NodeId) {
        let node = self.graph.node_mut(from);
        match edge {
            Edge::Next => node.next = Some(to),
            Edge::Branch(index) => {
                if node.branches.len() <= index {
                    node.branches.resize(index + 1, to);
                }
                node.branches[index] = to;
            }
            Edge::Exception => node.exception = Some(to),
        }
    }

    /// Link a fixed node at the tail. The tail moves to its `next` edge.
    fn append(&mut self, node: Node) -> GraphResult<NodeId> {
        let (from, edge) = self.tail.ok_or(GraphError::Unreachable)?;
        let id = self.graph.add(node);
        self.link(from, edge, id);
        self.tail = Some((id, Edge::Next));
        Ok(id)
    }

    fn terminate(&mut self, node: Node) -> GraphResult<NodeId> {
        let id = self.append(node)?;
        self.tail = None;
        Ok(id)
    }

    /// Continue building at `edge` of `node`.
    pub fn enter(&mut self, node: NodeId, edge: Edge) {
        self.tail = Some((node, edge));
    }

    pub fn load(&mut self, address: NodeId) -> GraphResult<NodeId> {
        self.append(Node::with_inputs(
            NodeKind::Memory(MemoryOp::Load),
            &[address],
        ))
    }

    pub fn store(&mut self, address: NodeId, value: NodeId) -> GraphResult<NodeId> {
        self.append(Node::with_inputs(
            NodeKind::Memory(MemoryOp::Store),
            &[address, value],
        ))
    }

    pub fn call(&mut self, target: CallTarget, args: &[NodeId]) -> GraphResult<NodeId> {
        self.append(Node::with_inputs(NodeKind::Call(target), args))
    }

    /// Call with an exception handler. Returns the call and the handler's
    /// exception object; the tail stays on the normal path.
    pub fn call_with_handler(
        &mut self,
        target: CallTarget,
        args: &[NodeId],
    ) -> GraphResult<(NodeId, NodeId)> {
        let call = self.call(target, args)?;
        let exception = self.graph.add(Node::new(NodeKind::ExceptionObject));
        self.link(call, Edge::Exception, exception);
        Ok((call, exception))
    }

    /// Two-way branch. Build each arm with `enter(if, Edge::Branch(i))`.
    pub fn if_node(&mut self, condition: NodeId) -> GraphResult<NodeId> {
        self.terminate(Node::with_inputs(NodeKind::If, &[condition]))
    }

    pub fn end(&mut self) -> GraphResult<NodeId> {
        self.terminate(Node::new(NodeKind::End))
    }

    pub fn merge(&mut self, ends: &[NodeId]) -> NodeId {
        let merge = self.graph.add(Node::new(NodeKind::Merge));
        for &end in ends {
            self.link(end, Edge::Next, merge);
        }
        self.tail = Some((merge, Edge::Next));
        merge
    }

    /// Close the tail with an end flowing into a fresh loop header.
    pub fn loop_begin(&mut self) -> GraphResult<NodeId> {
        let entry = self.end()?;
        let header = self.graph.add(Node::new(NodeKind::LoopBegin));
        self.link(entry, Edge::Next, header);
        self.tail = Some((header, Edge::Next));
        Ok(header)
    }

    pub fn loop_end(&mut self, header: NodeId) -> GraphResult<NodeId> {
        let end = self.terminate(Node::new(NodeKind::LoopEnd))?;
        self.link(end, Edge::Next, header);
        Ok(end)
    }

    pub fn ret(&mut self, value: Option<NodeId>) -> GraphResult<NodeId> {
        let inputs: Vec<NodeId> = value.into_iter().collect();
        self.terminate(Node::with_inputs(NodeKind::Return, &inputs))
    }

    pub fn unwind(&mut self, exception: NodeId) -> GraphResult<NodeId> {
        self.terminate(Node::with_inputs(NodeKind::Unwind, &[exception]))
    }

    /// Verify and hand out the graph.
    pub fn finish(self) -> GraphResult<Graph> {
        self.graph.verify()?;
        Ok(self.graph)
    }
}
