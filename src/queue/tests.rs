use super::*;
use crate::config::ConfigError;
use crate::program::{Program, ProgramParser};
use crate::universe::MethodUnit;

/// `main` calls a never-inlined helper twice and dispatches virtually
/// over two implementations.
const DISPATCH: &str = r#"
    [[method]]
    name = "main"
    entry = true
    body = [
        { op = "const", name = "x", value = 3 },
        { op = "call", target = "helper", args = ["x"], name = "y" },
        { op = "call", target = "helper", args = ["y"], name = "z" },
        { op = "call", target = "shape", args = ["z"], virtual_call = true, name = "w" },
        { op = "return", value = "w" },
    ]

    [[method]]
    name = "helper"
    params = 1
    never_inline = true
    body = [
        { op = "arith", kind = "mul", lhs = "p0", rhs = "p0", name = "r" },
        { op = "return", value = "r" },
    ]

    [[method]]
    name = "shape"
    params = 1
    abstract = true

    [[method]]
    name = "circle"
    params = 1
    overrides = "shape"
    body = [{ op = "return", value = "p0" }]

    [[method]]
    name = "rect"
    params = 1
    overrides = "shape"
    body = [
        { op = "arith", kind = "add", lhs = "p0", rhs = "p0", name = "r" },
        { op = "return", value = "r" },
    ]
"#;

type TestQueue<B = SizeEstimateBackend> = CompileQueue<ProgramParser, ProgramParser, B>;

fn config() -> InliningConfig {
    InliningConfig {
        threads: 2,
        ..Default::default()
    }
}

fn queue(source: &str) -> TestQueue {
    queue_with(source, SizeEstimateBackend::default())
}

fn queue_with<B: Backend>(source: &str, backend: B) -> TestQueue<B> {
    let (universe, parser) = Program::parse(source).unwrap().build().unwrap();
    CompileQueue::new(universe, parser.clone(), parser, backend, config()).unwrap()
}

fn id<B: Backend>(queue: &TestQueue<B>, name: &str) -> UnitId {
    queue.universe().lookup(name).unwrap()
}

/// Refuses to compile one method.
struct RefusingBackend {
    refuse: &'static str,
}

impl Backend for RefusingBackend {
    type Artifact = EstimatedCode;

    fn compile(&self, unit: &MethodUnit, graph: &Graph) -> Result<EstimatedCode, BackendError> {
        if unit.name() == self.refuse {
            return Err(BackendError::new(unit.qualified_name(), "refused"));
        }
        SizeEstimateBackend::default().compile(unit, graph)
    }
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_new_rejects_invalid_config() {
    let (universe, parser) = Program::parse(DISPATCH).unwrap().build().unwrap();
    let config = InliningConfig {
        t1: 0.0,
        ..Default::default()
    };
    let result = CompileQueue::new(
        universe,
        parser.clone(),
        parser,
        SizeEstimateBackend::default(),
        config,
    );
    assert!(matches!(
        result,
        Err(SchedulerError::Config(ConfigError::Invalid { knob: "t1", .. }))
    ));
}

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn test_parse_follows_reachable_calls() {
    let source = r#"
        [[method]]
        name = "main"
        entry = true
        body = [
            { op = "const", name = "x", value = 3 },
            { op = "call", target = "helper", args = ["x"], name = "y" },
            { op = "call", target = "dead" },
            { op = "return", value = "y" },
        ]

        [[method]]
        name = "helper"
        params = 1
        never_inline = true
        body = [
            { op = "arith", kind = "mul", lhs = "p0", rhs = "p0", name = "r" },
            { op = "return", value = "r" },
        ]

        [[method]]
        name = "dead"
        unreachable = true
        body = [{ op = "return" }]

        [[method]]
        name = "orphan"
        body = [{ op = "return" }]
    "#;
    let queue = queue(source);
    assert_eq!(queue.parse_all().unwrap(), 2);

    let universe = queue.universe();
    let main = universe.unit(id(&queue, "main"));
    let helper = universe.unit(id(&queue, "helper"));
    assert!(main.has_graph());
    assert!(helper.has_graph());
    assert!(!universe.unit(id(&queue, "dead")).has_graph());
    assert!(!universe.unit(id(&queue, "orphan")).is_parse_claimed());

    let parsed_nodes = main.counters.nodes_after_parsing.load(Ordering::Relaxed);
    assert_eq!(parsed_nodes, main.graph().unwrap().live_count());
    // never-inline methods are not marked trivial even when small
    assert!(!helper.is_trivial());
}

#[test]
fn test_parse_marks_small_bodies_trivial() {
    let queue = queue(DISPATCH);
    queue.parse_all().unwrap();
    let universe = queue.universe();
    assert!(universe.unit(id(&queue, "circle")).is_trivial());
    assert!(universe.unit(id(&queue, "rect")).is_trivial());
    // three invokes
    assert!(!universe.unit(id(&queue, "main")).is_trivial());
}

#[test]
fn test_single_implementation_is_devirtualized() {
    let source = r#"
        [[method]]
        name = "main"
        entry = true
        body = [
            { op = "const", name = "x", value = 1 },
            { op = "call", target = "base", args = ["x"], virtual_call = true, name = "y" },
            { op = "return", value = "y" },
        ]

        [[method]]
        name = "base"
        params = 1
        abstract = true

        [[method]]
        name = "live"
        params = 1
        overrides = "base"
        body = [{ op = "return", value = "p0" }]

        [[method]]
        name = "gone"
        params = 1
        overrides = "base"
        unreachable = true
        body = [{ op = "return", value = "p0" }]
    "#;
    let queue = queue(source);
    assert_eq!(queue.parse_all().unwrap(), 2);

    let live = id(&queue, "live");
    let graph = queue.universe().unit(id(&queue, "main")).graph().unwrap();
    let calls = graph.call_sites();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        graph.node(calls[0]).kind.call_target(),
        Some(CallTarget::direct(live))
    );
    assert!(!queue.universe().unit(id(&queue, "gone")).has_graph());
    assert!(!queue.universe().unit(id(&queue, "base")).has_graph());
}

#[test]
fn test_polymorphic_call_stays_virtual() {
    let queue = queue(DISPATCH);
    assert_eq!(queue.parse_all().unwrap(), 4);

    let graph = queue.universe().unit(id(&queue, "main")).graph().unwrap();
    let virtual_calls = graph
        .call_sites()
        .into_iter()
        .filter(|&c| {
            graph
                .node(c)
                .kind
                .call_target()
                .is_some_and(|t| t.kind == CallKind::Virtual)
        })
        .count();
    assert_eq!(virtual_calls, 1);
    assert!(queue.universe().unit(id(&queue, "circle")).has_graph());
    assert!(queue.universe().unit(id(&queue, "rect")).has_graph());
}

#[test]
fn test_parse_error_carries_wave() {
    let source = r#"
        [[method]]
        name = "main"
        entry = true
        body = [
            { op = "call", target = "broken" },
            { op = "return" },
        ]

        [[method]]
        name = "broken"
        body = [{ op = "const", name = "x", value = 1 }]
    "#;
    let queue = queue(source);
    let err = queue.parse_all().unwrap_err();
    match &err {
        SchedulerError::InRound {
            phase, round, unit, ..
        } => {
            assert_eq!(*phase, Phase::Parse);
            assert_eq!(*round, 2);
            assert_eq!(unit, "broken");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(matches!(
        err.root_cause(),
        SchedulerError::Parse(ParseError { unit, .. }) if unit == "broken"
    ));
}

// ============================================================================
// Compilation
// ============================================================================

#[test]
fn test_compile_reasons_and_counters() {
    let queue = queue(DISPATCH);
    let summary = queue.finish().unwrap();
    assert_eq!(summary.parsed, 4);
    assert_eq!(summary.compiled, 4);

    let main = id(&queue, "main");
    let reason = |name: &str| queue.compilation(id(&queue, name)).map(|t| t.reason);
    assert_eq!(reason("main"), Some(CompileReason::EntryPoint));
    assert_eq!(reason("helper"), Some(CompileReason::DirectCall { caller: main }));
    assert_eq!(reason("circle"), Some(CompileReason::VirtualCall { caller: main }));
    assert_eq!(reason("rect"), Some(CompileReason::VirtualCall { caller: main }));
    assert_eq!(reason("shape"), None);

    let counters = |name: &str| &queue.universe().unit(id(&queue, name)).counters;
    assert_eq!(counters("main").entry_point.load(Ordering::Relaxed), 1);
    assert_eq!(counters("helper").direct_calls.load(Ordering::Relaxed), 2);
    assert_eq!(counters("circle").virtual_calls.load(Ordering::Relaxed), 1);
    assert_eq!(counters("rect").virtual_calls.load(Ordering::Relaxed), 1);
}

#[test]
fn test_histogram_orders_by_code_size() {
    let queue = queue(DISPATCH);
    let summary = queue.finish().unwrap();
    let rows = summary.histogram.rows();

    // 4 bytes per cost unit: main 9, helper 5, rect 4, circle 3
    let sizes: Vec<(&str, usize)> = rows
        .iter()
        .map(|r| (r.method.as_str(), r.code_size))
        .collect();
    assert_eq!(
        sizes,
        vec![("main", 36), ("helper", 20), ("rect", 16), ("circle", 12)]
    );
    assert_eq!(summary.histogram.total_code_size(), 84);

    let rendered = summary.histogram.to_string();
    assert!(rendered.starts_with("Code Size; Nodes Parsing;"));
    assert!(rendered.ends_with("TOTAL (4 methods)"));
}

#[test]
fn test_deopt_target_uses_its_own_suite() {
    let source = r#"
        [[method]]
        name = "main"
        entry = true
        deopt_target = true
        body = [
            { op = "const", name = "a", value = 2 },
            { op = "const", name = "b", value = 3 },
            { op = "arith", kind = "mul", lhs = "a", rhs = "b", name = "c" },
            { op = "call", target = "helper", args = ["c"], name = "y" },
            { op = "return", value = "y" },
        ]

        [[method]]
        name = "helper"
        params = 1
        never_inline = true
        body = [{ op = "return", value = "p0" }]

        [[method]]
        name = "idle"
        deopt_target = true
        body = [{ op = "return" }]
    "#;
    let queue = queue(source);
    let summary = queue.finish().unwrap();
    assert_eq!(summary.parsed, 3);
    assert_eq!(summary.compiled, 3);

    let main = queue.universe().unit(id(&queue, "main"));
    let deopt_id = main.deopt_target().unwrap();
    let deopt = queue.universe().unit(deopt_id);
    let idle = queue.universe().unit(id(&queue, "idle"));
    assert!(!queue.universe().unit(idle.deopt_target().unwrap()).has_graph());

    assert_eq!(
        queue.compilation(deopt_id).map(|t| t.reason),
        Some(CompileReason::DeoptTarget)
    );
    // the regular suite folds 2 * 3 and drops both constants
    assert_eq!(main.counters.nodes_before_compile.load(Ordering::Relaxed), 6);
    assert_eq!(main.counters.nodes_after_compile.load(Ordering::Relaxed), 4);
    assert_eq!(deopt.counters.nodes_before_compile.load(Ordering::Relaxed), 6);
    assert_eq!(deopt.counters.nodes_after_compile.load(Ordering::Relaxed), 6);

    let helper = &queue.universe().unit(id(&queue, "helper")).counters;
    assert_eq!(helper.direct_calls.load(Ordering::Relaxed), 2);

    let deopt_row = summary
        .histogram
        .rows()
        .iter()
        .find(|r| r.method == "main@deopt")
        .unwrap();
    assert!(deopt_row.deopt_target);
}

#[test]
fn test_inlined_callee_is_not_compiled() {
    let source = r#"
        [[method]]
        name = "main"
        entry = true
        body = [
            { op = "const", name = "x", value = 41 },
            { op = "call", target = "inc", args = ["x"], name = "y" },
            { op = "return", value = "y" },
        ]

        [[method]]
        name = "inc"
        params = 1
        body = [
            { op = "const", name = "one", value = 1 },
            { op = "arith", kind = "add", lhs = "p0", rhs = "one", name = "r" },
            { op = "return", value = "r" },
        ]
    "#;
    let queue = queue(source);
    let summary = queue.finish().unwrap();
    assert_eq!(summary.schedule.trivial.rounds[0].published, 1);
    assert_eq!(summary.compiled, 1);

    let inc = id(&queue, "inc");
    assert!(queue.compilation(inc).is_none());
    let tasks = queue.into_compilations();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].artifact.unit, "main");
}

#[test]
fn test_call_to_void_method_with_used_value_is_compiled() {
    let source = r#"
        [[method]]
        name = "main"
        entry = true
        body = [
            { op = "call", target = "noval", name = "y" },
            { op = "return", value = "y" },
        ]

        [[method]]
        name = "noval"
        body = [{ op = "return" }]
    "#;
    let queue = queue(source);
    let summary = queue.finish().unwrap();
    assert_eq!(summary.schedule.trivial.total_published(), 0);
    assert_eq!(summary.compiled, 2);

    let main = id(&queue, "main");
    let graph = queue.universe().unit(main).graph().unwrap();
    assert_eq!(graph.call_sites().len(), 1);
    let noval = id(&queue, "noval");
    assert_eq!(
        queue.compilation(noval).map(|t| t.reason),
        Some(CompileReason::DirectCall { caller: main })
    );
    let counters = &queue.universe().unit(noval).counters;
    assert_eq!(counters.direct_calls.load(Ordering::Relaxed), 1);
}

#[test]
fn test_backend_error_carries_wave() {
    let queue = queue_with(DISPATCH, RefusingBackend { refuse: "helper" });
    queue.parse_all().unwrap();
    queue.inline_all().unwrap();
    let err = queue.compile_all().unwrap_err();

    assert!(matches!(
        &err,
        SchedulerError::InRound { phase: Phase::Compile, round: 2, unit, .. } if unit == "helper"
    ));
    assert!(matches!(
        err.root_cause(),
        SchedulerError::Backend(BackendError { message, .. }) if message == "refused"
    ));
}

// ============================================================================
// Suites
// ============================================================================

#[test]
fn test_suite_selection() {
    let suites = Suites::default();
    assert_eq!(
        suites.regular.phases(),
        &[SuitePhase::Canonicalize, SuitePhase::DeadCodeElimination]
    );
    assert_eq!(suites.deopt_target.phases(), &[SuitePhase::DeadCodeElimination]);
    assert_eq!(suites.deopt_target.name(), "deopt-target");
}
