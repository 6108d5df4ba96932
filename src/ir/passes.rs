//! Graph clean-up passes
//!
//! - [`canonicalize`]: constant folding plus removal of unused values
//! - [`eliminate_dead_code`]: removal of control flow unreachable from start
//! - [`excise_region`]: removal of one control region that lost its entry
//! - [`count_foldable`]: how much a splice would simplify (inlining benefit)
//!
//! All edits go through the logged graph API, so the passes are safe to
//! run inside an open transaction.

use super::graph::Graph;
use super::node::{Node, NodeId, NodeKind};

fn constant_of(graph: &Graph, id: NodeId) -> Option<i64> {
    match graph.live(id)?.kind {
        NodeKind::Constant(value) => Some(value),
        _ => None,
    }
}

fn folded_value(graph: &Graph, node: &Node) -> Option<i64> {
    let lhs = constant_of(graph, *node.inputs.first()?)?;
    let rhs = constant_of(graph, *node.inputs.get(1)?)?;
    match node.kind {
        NodeKind::Arith(op) => op.fold(lhs, rhs),
        NodeKind::Compare(op) => Some(op.fold(lhs, rhs)),
        _ => None,
    }
}

/// A phi whose value inputs all agree collapses to that value.
fn redundant_phi(node: &Node) -> Option<NodeId> {
    let mut values = node.inputs.iter().skip(1);
    let first = *values.next()?;
    values.all(|&v| v == first).then_some(first)
}

fn usage_counts(graph: &Graph) -> Vec<u32> {
    let mut counts = vec![0u32; graph.arena_len()];
    for (_, node) in graph.live_nodes() {
        for &input in &node.inputs {
            counts[input.index()] += 1;
        }
    }
    counts
}

/// Fold constant arithmetic and drop unused floating values. Returns the
/// number of nodes folded or removed.
pub fn canonicalize(graph: &mut Graph) -> usize {
    let mut total = 0;
    loop {
        let mut changed = 0;
        for index in 0..graph.arena_len() {
            let id = NodeId::new(index);
            let Some(node) = graph.live(id) else { continue };
            let replacement = match node.kind {
                NodeKind::Arith(_) | NodeKind::Compare(_) => {
                    folded_value(graph, node).map(Replacement::Constant)
                }
                NodeKind::Phi => redundant_phi(node)
                    .filter(|&value| value != id)
                    .map(Replacement::Existing),
                _ => None,
            };
            let Some(replacement) = replacement else { continue };
            let new = match replacement {
                Replacement::Existing(value) => value,
                Replacement::Constant(value) => graph.add(Node::new(NodeKind::Constant(value))),
            };
            graph.replace_usages(id, new);
            graph.delete(id);
            changed += 1;
        }
        changed += remove_unused_values(graph);
        if changed == 0 {
            break;
        }
        total += changed;
    }
    total
}

enum Replacement {
    Existing(NodeId),
    Constant(i64),
}

/// Delete pure values that nothing consumes.
fn remove_unused_values(graph: &mut Graph) -> usize {
    let mut removed = 0;
    loop {
        let counts = usage_counts(graph);
        let dead: Vec<NodeId> = graph
            .live_nodes()
            .filter(|(id, node)| {
                matches!(
                    node.kind,
                    NodeKind::Constant(_) | NodeKind::Arith(_) | NodeKind::Compare(_) | NodeKind::Phi
                ) && counts[id.index()] == 0
            })
            .map(|(id, _)| id)
            .collect();
        if dead.is_empty() {
            return removed;
        }
        removed += dead.len();
        for id in dead {
            graph.delete(id);
        }
    }
}

/// Delete fixed nodes that control can no longer reach. Returns the number
/// of deleted nodes; nothing is deleted if a reachable node still consumes
/// a value from the dead region.
pub fn eliminate_dead_code(graph: &mut Graph) -> usize {
    let reachable = graph.reachable();
    let doomed: Vec<NodeId> = graph
        .live_nodes()
        .filter(|(id, node)| node.kind.is_fixed() && !reachable[id.index()])
        .map(|(id, _)| id)
        .collect();
    if doomed.is_empty() {
        return 0;
    }
    let mut is_doomed = vec![false; graph.arena_len()];
    for id in &doomed {
        is_doomed[id.index()] = true;
    }
    let escapes = graph
        .live_nodes()
        .filter(|(id, _)| !is_doomed[id.index()])
        .any(|(_, node)| node.inputs.iter().any(|i| is_doomed[i.index()]));
    if escapes {
        return 0;
    }
    for &id in &doomed {
        graph.delete(id);
    }
    doomed.len() + remove_unused_values(graph)
}

/// Delete the control region entered at `entry`, whose only way in is
/// gone, along with the values computed in it and the values only it
/// consumed. Returns the number of deleted nodes; nothing is deleted if
/// the region joins live control flow or a live node uses one of its
/// values.
pub fn excise_region(graph: &mut Graph, entry: NodeId) -> usize {
    let mut in_region = vec![false; graph.arena_len()];
    let mut region: Vec<NodeId> = Vec::new();
    let mut stack = vec![entry];
    while let Some(id) = stack.pop() {
        let Some(node) = graph.live(id) else { continue };
        if std::mem::replace(&mut in_region[id.index()], true) {
            continue;
        }
        region.push(id);
        stack.extend(node.successors());
    }
    // Values computed inside the region, phis at its merges included.
    loop {
        let derived: Vec<NodeId> = graph
            .live_nodes()
            .filter(|(id, node)| {
                !in_region[id.index()]
                    && !node.kind.is_fixed()
                    && node.inputs.iter().any(|i| in_region[i.index()])
            })
            .map(|(id, _)| id)
            .collect();
        if derived.is_empty() {
            break;
        }
        for &id in &derived {
            in_region[id.index()] = true;
        }
        region.extend(derived);
    }

    let joins = graph
        .live_nodes()
        .filter(|(id, _)| !in_region[id.index()])
        .any(|(_, node)| {
            node.successors().any(|s| in_region[s.index()])
                || node.inputs.iter().any(|i| in_region[i.index()])
        });
    if joins {
        return 0;
    }

    let mut candidates: Vec<NodeId> = region
        .iter()
        .flat_map(|&id| graph.node(id).inputs.iter().copied())
        .filter(|i| !in_region[i.index()])
        .collect();
    for &id in &region {
        graph.delete(id);
    }
    let mut removed = region.len();
    while let Some(id) = candidates.pop() {
        let Some(node) = graph.live(id) else { continue };
        let pure = matches!(
            node.kind,
            NodeKind::Constant(_) | NodeKind::Arith(_) | NodeKind::Compare(_) | NodeKind::Phi
        );
        if !pure || graph.usage_count(id) > 0 {
            continue;
        }
        candidates.extend(node.inputs.clone());
        graph.delete(id);
        removed += 1;
    }
    removed
}

/// Nodes at or after `from` that would fold away: arithmetic and compares
/// over constants, and branches on a constant condition.
pub fn count_foldable(graph: &Graph, from: NodeId) -> usize {
    graph
        .live_nodes()
        .filter(|(id, _)| *id >= from)
        .filter(|(_, node)| match node.kind {
            NodeKind::Arith(_) | NodeKind::Compare(_) => folded_value(graph, node).is_some(),
            NodeKind::If => node
                .inputs
                .first()
                .is_some_and(|&c| constant_of(graph, c).is_some()),
            _ => false,
        })
        .count()
}
