//! Shared helpers for the pipeline integration tests
//!
//! Fixtures live in `tests/fixtures/` and are TOML program descriptions
//! or inlining configurations.

#![allow(dead_code)]

use aotinline::program::{Program, ProgramParser};
use aotinline::queue::{CompileQueue, EstimatedCode, SizeEstimateBackend};
use aotinline::{InliningConfig, Universe};
use std::path::PathBuf;

pub type Queue = CompileQueue<ProgramParser, ProgramParser, SizeEstimateBackend>;

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn load_program(name: &str) -> (Universe, ProgramParser) {
    Program::load(&fixture_path(name))
        .and_then(Program::build)
        .unwrap_or_else(|e| panic!("fixture {} failed to load: {}", name, e))
}

/// Default knobs with a fixed worker count.
pub fn config(threads: usize) -> InliningConfig {
    InliningConfig {
        threads,
        ..Default::default()
    }
}

pub fn queue(name: &str, config: InliningConfig) -> Queue {
    let (universe, parser) = load_program(name);
    CompileQueue::new(
        universe,
        parser.clone(),
        parser,
        SizeEstimateBackend::default(),
        config,
    )
    .expect("valid configuration")
}

/// Method names of the compiled units, sorted.
pub fn compiled_names(queue: &Queue) -> Vec<String> {
    let mut names: Vec<String> = queue
        .universe()
        .iter()
        .filter(|u| queue.compilation(u.id()).is_some())
        .map(|u| u.qualified_name())
        .collect();
    names.sort();
    names
}

/// Artifacts in unit order, for comparing whole runs.
pub fn artifacts(queue: Queue) -> Vec<EstimatedCode> {
    queue
        .into_compilations()
        .into_iter()
        .map(|task| task.artifact)
        .collect()
}
