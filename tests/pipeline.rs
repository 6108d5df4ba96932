//! End-to-end runs of the compile queue over the TOML fixtures

mod common;

use aotinline::config::ConfigError;
use aotinline::ir::CallKind;
use aotinline::program::{Program, ProgramError};
use aotinline::InliningConfig;
use common::{artifacts, compiled_names, config, fixture_path, queue};

// ============================================================================
// Trivial phase and dispatch
// ============================================================================

#[test]
fn test_shapes_compiles_entry_closure() {
    let queue = queue("shapes.toml", config(2));
    let summary = queue.finish().unwrap();

    assert_eq!(summary.parsed, 6);
    assert_eq!(summary.compiled, 4);
    // clamp and risky were spliced into both main variants
    assert_eq!(
        compiled_names(&queue),
        vec!["circle", "main", "main@deopt", "rect"]
    );
    assert!(summary.schedule.trivial.rounds[0].published >= 2);
}

#[test]
fn test_shapes_virtual_call_survives() {
    let queue = queue("shapes.toml", config(2));
    queue.finish().unwrap();

    let universe = queue.universe();
    let main = universe.unit(universe.lookup("main").unwrap());
    let graph = main.graph().unwrap();
    let kinds: Vec<CallKind> = graph
        .call_sites()
        .into_iter()
        .filter_map(|c| graph.node(c).kind.call_target())
        .map(|t| t.kind)
        .collect();
    assert_eq!(kinds, vec![CallKind::Virtual]);

    for name in ["circle", "rect"] {
        let unit = universe.unit(universe.lookup(name).unwrap());
        assert_eq!(
            unit.counters
                .virtual_calls
                .load(std::sync::atomic::Ordering::Relaxed),
            2,
            "{} is reached from main and its deopt target",
            name
        );
    }
}

#[test]
fn test_histogram_matches_compilations() {
    let queue = queue("shapes.toml", config(2));
    let summary = queue.finish().unwrap();
    let rows = summary.histogram.rows();

    assert_eq!(rows.len(), summary.compiled);
    for pair in rows.windows(2) {
        assert!(pair[0].code_size >= pair[1].code_size);
    }
    let deopt_rows = rows.iter().filter(|r| r.deopt_target).count();
    assert_eq!(deopt_rows, 1);
    let entry = rows.iter().find(|r| r.method == "main").unwrap();
    assert_eq!(entry.entry_point, 1);
}

// ============================================================================
// Non-trivial phase
// ============================================================================

#[test]
fn test_hot_hub_absorbs_leaves() {
    let config = InliningConfig {
        aot_trivial_inline: false,
        ..config(4)
    };
    let queue = queue("hot_hub.toml", config);
    let summary = queue.finish().unwrap();

    // one leaf per round after the discovery round
    assert_eq!(summary.schedule.trivial.total_published(), 0);
    assert_eq!(summary.schedule.non_trivial.total_published(), 3);
    assert!(summary.schedule.non_trivial.round_count() >= 4);

    let universe = queue.universe();
    let hub = universe.unit(universe.lookup("hub").unwrap());
    assert!(hub.graph().unwrap().call_sites().is_empty());
    assert_eq!(hub.lock_state().inlined_count, 3);
    assert_eq!(compiled_names(&queue), vec!["hub", "main"]);
}

#[test]
fn test_cold_callers_keep_their_calls() {
    let config = InliningConfig {
        aot_trivial_inline: false,
        ..config(2)
    };
    let queue = queue("hot_hub.toml", config);
    queue.finish().unwrap();

    // main has no callers, so inlining hub never pays off
    let universe = queue.universe();
    let main = universe.unit(universe.lookup("main").unwrap());
    assert_eq!(main.graph().unwrap().call_sites().len(), 10);
    assert!(universe.iter().filter(|u| u.has_graph()).all(|u| u.is_halted()));
}

#[test]
fn test_same_result_for_any_thread_count() {
    let run = |threads: usize| {
        let config = InliningConfig {
            aot_trivial_inline: false,
            ..config(threads)
        };
        let queue = queue("hot_hub.toml", config);
        let summary = queue.finish().unwrap();
        (summary.schedule, summary.histogram, artifacts(queue))
    };

    let single = run(1);
    assert_eq!(single, run(2));
    assert_eq!(single, run(8));
}

// ============================================================================
// Configuration and loading
// ============================================================================

#[test]
fn test_config_fixture() {
    let config = InliningConfig::load(&fixture_path("inlining.toml")).unwrap();
    assert_eq!(config.max_nodes_in_trivial_leaf_method, 30);
    assert_eq!(config.max_nodes_in_trivial_method, 15);
    assert_eq!(config.t1, 6.0);
    assert_eq!(config.threads, 2);
    assert_eq!(config.t2, 1.0);

    let queue = queue("shapes.toml", config);
    assert_eq!(queue.finish().unwrap().compiled, 4);
}

#[test]
fn test_presets_run_to_completion() {
    for preset in [InliningConfig::conservative(), InliningConfig::aggressive()] {
        let config = InliningConfig {
            threads: 2,
            ..preset
        };
        let summary = queue("shapes.toml", config).finish().unwrap();
        assert!(summary.compiled >= 4);
    }
}

#[test]
fn test_missing_files() {
    assert!(matches!(
        Program::load(&fixture_path("absent.toml")),
        Err(ProgramError::Io { .. })
    ));
    assert!(matches!(
        InliningConfig::load(&fixture_path("absent.toml")),
        Err(ConfigError::Io { .. })
    ));
}
