//! Speculative call-site expansion
//!
//! ```text
//!   pred ─► Call(f) ─► cont            pred ─► [body of f] ─► cont
//!              │                ==>                 │
//!              └─exc─► handler                      └─unwind─► handler
//! ```
//!
//! A splice copies the callee body into the caller with fresh node ids,
//! substitutes parameters by the call's arguments, routes returns to the
//! call's continuation (through a merge and phi when there are several)
//! and routes unwinds to the call's exception handler. A handler the
//! callee can never reach is cut out together with its body.
//!
//! [`SpeculativeInliner::begin`] records the pre-splice size *before* it
//! touches the graph and performs the splice inside a graph transaction,
//! so rejecting the attempt is a transaction abort that restores the
//! original call, its continuation and its exception edge exactly.

use super::callee::CalleeTable;
use super::cost::GraphCostModel;
use super::InliningError;
use crate::ir::{
    count_foldable, excise_region, Graph, GraphError, GraphResult, Mark, Node, NodeId, NodeKind,
};
use crate::universe::UnitId;
use smallvec::SmallVec;

/// What one splice copied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceOutcome {
    /// First caller node id that belongs to the copied body
    pub first_new: NodeId,
    /// Calls copied from the callee
    pub invokes: usize,
    /// Arguments that are constants and sharpen the callee's parameters
    pub improved_stamps: usize,
    /// Copied nodes that now fold away
    pub benefit: usize,
}

/// Splice `callee` at `call`, permanently. All checks run before the first
/// edit, so an error leaves `graph` untouched.
pub fn splice(graph: &mut Graph, call: NodeId, callee: &Graph) -> GraphResult<SpliceOutcome> {
    let call_node = graph
        .live(call)
        .filter(|n| n.kind.call_target().is_some())
        .ok_or(GraphError::NotACall(call))?
        .clone();
    let (pred, pred_edge) = graph
        .predecessor(call)
        .ok_or(GraphError::MissingPredecessor(call))?;
    let continuation = call_node.next.ok_or(GraphError::MalformedEdge {
        node: call,
        reason: "call without continuation",
    })?;
    let entry = callee
        .live(callee.start())
        .and_then(|start| start.next)
        .ok_or_else(|| GraphError::MalformedCallee("empty body".to_string()))?;

    let params = callee
        .live_nodes()
        .filter(|(_, n)| matches!(n.kind, NodeKind::Parameter(_)))
        .count();
    if call_node.inputs.len() < params {
        return Err(GraphError::ArityMismatch {
            call,
            expected: params,
            got: call_node.inputs.len(),
        });
    }

    // Assign caller ids to every copied node; parameters resolve to arguments.
    let mut remap: Vec<Option<NodeId>> = vec![None; callee.arena_len()];
    let mut next_id = graph.arena_len();
    for (id, node) in callee.live_nodes() {
        match node.kind {
            NodeKind::Start => {}
            NodeKind::Parameter(index) => {
                remap[id.index()] = call_node.inputs.get(index as usize).copied();
            }
            _ => {
                remap[id.index()] = Some(NodeId::new(next_id));
                next_id += 1;
            }
        }
    }
    let map = |from: NodeId, to: NodeId| -> GraphResult<NodeId> {
        remap
            .get(to.index())
            .copied()
            .flatten()
            .ok_or_else(|| {
                GraphError::MalformedCallee(format!("edge {} -> {} leaves the body", from, to))
            })
    };

    let mut copies: Vec<Node> = Vec::new();
    let mut returns: Vec<(NodeId, Option<NodeId>)> = Vec::new();
    let mut unwinds: Vec<(NodeId, NodeId)> = Vec::new();
    let mut invokes = 0;
    for (id, node) in callee.live_nodes() {
        if matches!(node.kind, NodeKind::Start | NodeKind::Parameter(_)) {
            continue;
        }
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
        let new_id = map(id, id)?;
        match node.kind {
            NodeKind::Return => returns.push((new_id, inputs.first().copied())),
            NodeKind::Unwind => {
                let exception = inputs.first().copied().ok_or_else(|| {
                    GraphError::MalformedCallee(format!("unwind {} without exception", id))
                })?;
                unwinds.push((new_id, exception));
            }
            NodeKind::Call(_) => invokes += 1,
            _ => {}
        }
        copies.push(Node {
            kind: node.kind,
            inputs,
            next: node.next.map(|n| map(id, n)).transpose()?,
            branches,
            exception: node.exception.map(|e| map(id, e)).transpose()?,
            deleted: false,
        });
    }

    if returns.is_empty() {
        return Err(GraphError::MalformedCallee("body never returns".to_string()));
    }
    let value_used = graph.usage_count(call) > 0;
    if value_used && returns.iter().any(|(_, v)| v.is_none()) {
        return Err(GraphError::MalformedCallee(
            "call value is used but the callee returns nothing".to_string(),
        ));
    }
    let handler = match call_node.exception {
        Some(handler) if !unwinds.is_empty() => {
            let after = graph.live(handler).and_then(|h| h.next).ok_or(
                GraphError::MalformedEdge {
                    node: handler,
                    reason: "exception handler without body",
                },
            )?;
            Some((handler, after))
        }
        _ => None,
    };
    let improved_stamps = call_node
        .inputs
        .iter()
        .take(params)
        .filter(|&&arg| matches!(graph.live(arg).map(|n| n.kind), Some(NodeKind::Constant(_))))
        .count();

    // Mutation starts here.
    let first_new = NodeId::new(graph.arena_len());
    for node in copies {
        graph.add(node);
    }
    graph.redirect(pred, pred_edge, map(callee.start(), entry)?);

    let value = join_exits(graph, &returns, continuation)?;
    if let Some(value) = value {
        graph.replace_usages(call, value);
    }
    if let Some((handler, after)) = handler {
        let exception = join_exits(graph, &unwinds_as_exits(&unwinds), after)?;
        if let Some(exception) = exception {
            graph.replace_usages(handler, exception);
        }
        graph.delete(handler);
    }
    graph.delete(call);
    if handler.is_none() {
        if let Some(orphan) = call_node.exception {
            excise_region(graph, orphan);
        }
    }

    Ok(SpliceOutcome {
        first_new,
        invokes,
        improved_stamps,
        benefit: count_foldable(graph, first_new),
    })
}

fn unwinds_as_exits(unwinds: &[(NodeId, NodeId)]) -> Vec<(NodeId, Option<NodeId>)> {
    unwinds.iter().map(|&(node, exc)| (node, Some(exc))).collect()
}

/// Replace exit nodes (returns or unwinds) by control flow into `target`.
/// Returns the joined value when every exit carries one.
fn join_exits(
    graph: &mut Graph,
    exits: &[(NodeId, Option<NodeId>)],
    target: NodeId,
) -> GraphResult<Option<NodeId>> {
    if let [(exit, value)] = exits {
        let (pred, edge) = graph
            .predecessor(*exit)
            .ok_or(GraphError::MissingPredecessor(*exit))?;
        graph.redirect(pred, edge, target);
        graph.delete(*exit);
        return Ok(*value);
    }

    let merge = graph.add(Node::new(NodeKind::Merge));
    graph.set_next(merge, Some(target));
    let mut values: Vec<NodeId> = vec![merge];
    for &(exit, value) in exits {
        let (pred, edge) = graph
            .predecessor(exit)
            .ok_or(GraphError::MissingPredecessor(exit))?;
        let end = graph.add(Node::new(NodeKind::End));
        graph.set_next(end, Some(merge));
        graph.redirect(pred, edge, end);
        graph.delete(exit);
        values.extend(value);
    }
    if values.len() == exits.len() + 1 {
        Ok(Some(graph.add(Node::with_inputs(NodeKind::Phi, &values))))
    } else {
        Ok(None)
    }
}

/// Where the pre-splice size of an attempt is recorded.
pub struct RecordSlot<'a> {
    pub table: &'a mut CalleeTable,
    pub depth: u32,
    pub second_level: bool,
}

/// An open speculative splice.
#[derive(Debug)]
pub struct SpeculativeScope {
    mark: Mark,
    pub callee: UnitId,
    pub call: NodeId,
    pub size_before: u64,
    pub outcome: SpliceOutcome,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpeculativeInliner {
    cost: GraphCostModel,
}

impl SpeculativeInliner {
    pub fn new(cost: GraphCostModel) -> Self {
        Self { cost }
    }

    pub fn cost_model(&self) -> &GraphCostModel {
        &self.cost
    }

    /// A body can be spliced at `call` if it has an entry and at least one
    /// return, and every return carries a value when the call's value is
    /// used. Other sites stay plain calls.
    pub fn is_inlinable(graph: &Graph, call: NodeId, callee: &Graph) -> bool {
        let has_entry = callee
            .live(callee.start())
            .is_some_and(|start| start.next.is_some());
        let mut returns = callee
            .live_nodes()
            .filter(|(_, n)| n.kind == NodeKind::Return)
            .peekable();
        if !has_entry || returns.peek().is_none() {
            return false;
        }
        graph.usage_count(call) == 0 || returns.all(|(_, n)| !n.inputs.is_empty())
    }

    /// Record the pre-splice size, then splice inside a transaction.
    pub fn begin(
        &self,
        graph: &mut Graph,
        call: NodeId,
        callee: UnitId,
        callee_graph: &Graph,
        record: Option<RecordSlot<'_>>,
    ) -> Result<SpeculativeScope, InliningError> {
        let size_before = self.cost.size(graph);
        if let Some(slot) = record {
            slot.table
                .record_size_before(callee, size_before, slot.depth, slot.second_level);
        }

        let mark = graph.begin();
        match splice(graph, call, callee_graph) {
            Ok(outcome) => Ok(SpeculativeScope {
                mark,
                callee,
                call,
                size_before,
                outcome,
            }),
            Err(source) => {
                graph.rollback(mark).map_err(InliningError::Transaction)?;
                Err(InliningError::Splice { call, source })
            }
        }
    }

    pub fn commit(&self, graph: &mut Graph, scope: SpeculativeScope) -> Result<(), InliningError> {
        graph.commit(scope.mark).map_err(InliningError::Transaction)
    }

    /// Abort the splice and check that the call site is back.
    pub fn rollback(
        &self,
        graph: &mut Graph,
        scope: SpeculativeScope,
    ) -> Result<(), InliningError> {
        graph
            .rollback(scope.mark)
            .map_err(InliningError::Transaction)?;
        let corrupted = |source| InliningError::RollbackCorrupted {
            call: scope.call,
            source,
        };
        if graph
            .live(scope.call)
            .and_then(|n| n.kind.call_target())
            .is_none()
        {
            return Err(corrupted(GraphError::NotACall(scope.call)));
        }
        graph.verify().map_err(corrupted)
    }
}
