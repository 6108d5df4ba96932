use super::*;
use crate::universe::UnitId;

/// `f(p0) = p0 + 1`, as built by hand.
fn increment() -> Graph {
    let mut b = GraphBuilder::new(1);
    let p0 = b.param(0).unwrap();
    let one = b.constant(1);
    let sum = b.arith(ArithOp::Add, p0, one);
    b.ret(Some(sum)).unwrap();
    b.finish().unwrap()
}

/// `if p0 < 0 { store } ; return p0`, with a merge of both arms.
fn diamond() -> Graph {
    let mut b = GraphBuilder::new(1);
    let p0 = b.param(0).unwrap();
    let zero = b.constant(0);
    let neg = b.compare(CmpOp::Lt, p0, zero);
    let branch = b.if_node(neg).unwrap();
    b.enter(branch, Edge::Branch(0));
    b.store(p0, zero).unwrap();
    let left = b.end().unwrap();
    b.enter(branch, Edge::Branch(1));
    let right = b.end().unwrap();
    b.merge(&[left, right]);
    b.ret(Some(p0)).unwrap();
    b.finish().unwrap()
}

// ============================================================================
// Builder
// ============================================================================

#[test]
fn test_builder_links_control_chain() {
    let g = increment();
    let start = g.node(g.start());
    assert_eq!(start.kind, NodeKind::Start);
    let ret = start.next.unwrap();
    assert_eq!(g.node(ret).kind, NodeKind::Return);
    assert_eq!(g.live_count(), 5);
    assert!(g.call_sites().is_empty());
}

#[test]
fn test_builder_rejects_code_after_terminator() {
    let mut b = GraphBuilder::new(0);
    b.ret(None).unwrap();
    assert!(!b.is_open());
    let c = b.constant(1);
    assert_eq!(b.load(c), Err(GraphError::Unreachable));
}

#[test]
fn test_builder_diamond_verifies() {
    let g = diamond();
    assert!(g.verify().is_ok());
    let merges = g
        .live_nodes()
        .filter(|(_, n)| n.kind == NodeKind::Merge)
        .count();
    assert_eq!(merges, 1);
}

#[test]
fn test_call_with_handler() {
    let mut b = GraphBuilder::new(0);
    let (call, exception) = b
        .call_with_handler(CallTarget::direct(UnitId::new(3)), &[])
        .unwrap();
    b.ret(None).unwrap();
    b.enter(exception, Edge::Next);
    b.unwind(exception).unwrap();
    let g = b.finish().unwrap();

    assert_eq!(g.node(call).exception, Some(exception));
    assert_eq!(g.invoke_count(), 1);
    assert_eq!(g.predecessor(exception), Some((call, Edge::Exception)));
}

// ============================================================================
// Edits and transactions
// ============================================================================

#[test]
fn test_predecessor_skips_end_edges() {
    let g = diamond();
    let merge = g
        .live_nodes()
        .find(|(_, n)| n.kind == NodeKind::Merge)
        .map(|(id, _)| id)
        .unwrap();
    assert_eq!(g.predecessor(merge), None);
    let ret = g.node(merge).next.unwrap();
    assert_eq!(g.predecessor(ret), Some((merge, Edge::Next)));
}

#[test]
fn test_replace_usages() {
    let mut g = increment();
    let ret = g.node(g.start()).next.unwrap();
    let sum = g.node(ret).inputs[0];
    let seven = g.add(Node::new(NodeKind::Constant(7)));
    assert_eq!(g.replace_usages(sum, seven), 1);
    assert_eq!(g.usage_count(sum), 0);
    assert_eq!(g.node(ret).inputs[0], seven);
}

#[test]
fn test_rollback_restores_graph() {
    let mut g = diamond();
    let before = g.clone();
    let ret = g
        .live_nodes()
        .find(|(_, n)| n.kind == NodeKind::Return)
        .map(|(id, _)| id)
        .unwrap();

    let mark = g.begin();
    let c = g.add(Node::new(NodeKind::Constant(9)));
    g.set_input(ret, 0, c);
    let other = g.add(Node::new(NodeKind::Return));
    let (pred, edge) = g.predecessor(ret).unwrap();
    g.redirect(pred, edge, other);
    g.delete(ret);
    assert_ne!(g, before);

    g.rollback(mark).unwrap();
    assert_eq!(g, before);
    assert!(!g.in_transaction());
    assert_eq!(g.arena_len(), before.arena_len());
}

#[test]
fn test_nested_rollback_keeps_outer_edits() {
    let mut g = increment();
    let ret = g.node(g.start()).next.unwrap();
    let sum = g.node(ret).inputs[0];

    let outer = g.begin();
    let five = g.add(Node::new(NodeKind::Constant(5)));
    g.set_input(ret, 0, five);

    let inner = g.begin();
    let six = g.add(Node::new(NodeKind::Constant(6)));
    g.set_input(ret, 0, six);
    g.rollback(inner).unwrap();

    assert_eq!(g.node(ret).inputs[0], five);
    assert!(g.in_transaction());

    g.rollback(outer).unwrap();
    assert_eq!(g.node(ret).inputs[0], sum);
    assert_eq!(g, increment());
}

#[test]
fn test_transactions_close_in_order() {
    let mut g = Graph::new();
    let outer = g.begin();
    let inner = g.begin();
    assert_eq!(
        g.commit(outer),
        Err(GraphError::TransactionOrder {
            expected: 2,
            found: 1
        })
    );
    assert!(g.commit(inner).is_ok());
    assert!(g.commit(outer).is_ok());
    assert!(!g.in_transaction());
}

#[test]
fn test_commit_keeps_edits() {
    let mut g = increment();
    let ret = g.node(g.start()).next.unwrap();
    let mark = g.begin();
    let c = g.add(Node::new(NodeKind::Constant(2)));
    g.set_input(ret, 0, c);
    g.commit(mark).unwrap();
    assert_eq!(g.node(ret).inputs[0], c);
    assert!(!g.in_transaction());
}

// ============================================================================
// Verification and encoding
// ============================================================================

#[test]
fn test_verify_detects_dangling_edge() {
    let mut g = Graph::new();
    let ret = g.add(Node::new(NodeKind::Return));
    g.set_next(g.start(), Some(ret));
    assert!(g.verify().is_ok());
    g.delete(ret);
    assert_eq!(
        g.verify(),
        Err(GraphError::DanglingEdge {
            from: g.start(),
            to: ret
        })
    );
}

#[test]
fn test_verify_end_needs_merge() {
    let mut g = Graph::new();
    let end = g.add(Node::new(NodeKind::End));
    let ret = g.add(Node::new(NodeKind::Return));
    g.set_next(g.start(), Some(end));
    g.set_next(end, Some(ret));
    assert!(matches!(
        g.verify(),
        Err(GraphError::MalformedEdge { node, .. }) if node == end
    ));
}

#[test]
fn test_verify_deleted_input() {
    let mut g = increment();
    let ret = g.node(g.start()).next.unwrap();
    let sum = g.node(ret).inputs[0];
    g.delete(sum);
    assert_eq!(
        g.verify(),
        Err(GraphError::DeletedInput {
            node: ret,
            input: sum
        })
    );
}

#[test]
fn test_encode_compacts_arena() {
    let mut g = increment();
    let dead = g.add(Node::new(NodeKind::Constant(99)));
    g.delete(dead);
    assert_eq!(g.arena_len(), 6);

    let encoded = g.encode().unwrap();
    assert_eq!(encoded.arena_len(), 5);
    assert_eq!(encoded.live_count(), 5);
    assert!(encoded.verify().is_ok());
    assert_eq!(encoded, increment());
}

// ============================================================================
// Passes
// ============================================================================

#[test]
fn test_canonicalize_folds_constants() {
    let mut b = GraphBuilder::new(0);
    let two = b.constant(2);
    let three = b.constant(3);
    let product = b.arith(ArithOp::Mul, two, three);
    let ret = b.ret(Some(product)).unwrap();
    let mut g = b.finish().unwrap();

    // fold + two unused constants
    assert_eq!(canonicalize(&mut g), 3);
    let folded = g.node(ret).inputs[0];
    assert_eq!(g.node(folded).kind, NodeKind::Constant(6));
    assert_eq!(g.live_count(), 3);
    assert!(g.verify().is_ok());
}

#[test]
fn test_canonicalize_keeps_trapping_division() {
    let mut b = GraphBuilder::new(0);
    let one = b.constant(1);
    let zero = b.constant(0);
    let quotient = b.arith(ArithOp::Div, one, zero);
    b.ret(Some(quotient)).unwrap();
    let mut g = b.finish().unwrap();

    assert_eq!(canonicalize(&mut g), 0);
    assert!(g.live(quotient).is_some());
}

#[test]
fn test_canonicalize_collapses_redundant_phi() {
    let mut b = GraphBuilder::new(1);
    let p0 = b.param(0).unwrap();
    let branch = b.if_node(p0).unwrap();
    b.enter(branch, Edge::Branch(0));
    let left = b.end().unwrap();
    b.enter(branch, Edge::Branch(1));
    let right = b.end().unwrap();
    let merge = b.merge(&[left, right]);
    let phi = b.phi(merge, &[p0, p0]);
    let ret = b.ret(Some(phi)).unwrap();
    let mut g = b.finish().unwrap();

    assert_eq!(canonicalize(&mut g), 1);
    assert_eq!(g.node(ret).inputs[0], p0);
    assert!(g.live(phi).is_none());
}

#[test]
fn test_dead_code_elimination() {
    let mut g = increment();
    let c = g.add(Node::new(NodeKind::Constant(5)));
    let store = g.add(Node::with_inputs(NodeKind::Memory(MemoryOp::Store), &[c, c]));
    let ret = g.add(Node::new(NodeKind::Return));
    g.set_next(store, Some(ret));

    // store, return, then the constant they used
    assert_eq!(eliminate_dead_code(&mut g), 3);
    assert_eq!(g.live_count(), 5);
    assert_eq!(eliminate_dead_code(&mut g), 0);
}

#[test]
fn test_dead_code_kept_when_value_escapes() {
    let mut g = increment();
    let live_ret = g.node(g.start()).next.unwrap();
    let load = g.add(Node::new(NodeKind::Memory(MemoryOp::Load)));
    g.set_input(live_ret, 0, load);
    assert_eq!(eliminate_dead_code(&mut g), 0);
    assert!(g.live(load).is_some());
}

#[test]
fn test_count_foldable() {
    let mut b = GraphBuilder::new(1);
    let p0 = b.param(0).unwrap();
    let one = b.constant(1);
    let two = b.constant(2);
    let _folds = b.arith(ArithOp::Add, one, two);
    let _stays = b.arith(ArithOp::Add, p0, two);
    let cond = b.constant(1);
    let branch = b.if_node(cond).unwrap();
    b.enter(branch, Edge::Branch(0));
    b.ret(None).unwrap();
    b.enter(branch, Edge::Branch(1));
    b.ret(None).unwrap();
    let g = b.finish().unwrap();

    assert_eq!(count_foldable(&g, NodeId::new(0)), 2);
    assert_eq!(count_foldable(&g, NodeId::new(g.arena_len())), 0);
}
