/// aotinline - Interprocedural Inlining Scheduler
///
/// This library decides, for a closed whole-program call graph, which call
/// sites to inline into which callers before code generation. Decisions
/// are made in synchronized rounds over all methods so that the result is
/// deterministic even though every round runs on a thread pool.
///
/// # Architecture
///
/// The pipeline consists of four stages, driven by [`queue::CompileQueue`]:
///
/// 1. **Parsing** (`queue` module, `Parser` collaborator)
///    - Parses everything reachable from the entry points, in waves
///    - Devirtualizes calls with a single reachable implementation
///    - Marks small bodies trivial
///
/// 2. **Trivial inlining** (`scheduler` module)
///    - Splices trivial and always-inline callees, one level deep
///    - Repeats until no unit is inlined into or becomes trivial
///
/// 3. **Non-trivial inlining** (`scheduler` and `inlining` modules)
///    - Round 1 measures every candidate's benefit/cost priority
///    - Each later round commits at most one target per unit, the
///      candidate with the highest priority, if it clears the threshold
///    - Stops when every unit has halted
///
/// 4. **Compilation** (`queue` module, `Backend` collaborator)
///    - Optimizes final bodies with a per-variant suite
///    - Hands them to the backend and collects a per-method histogram
///
/// # Example
///
/// ```rust
/// use aotinline::program::Program;
/// use aotinline::queue::{CompileQueue, SizeEstimateBackend};
/// use aotinline::InliningConfig;
///
/// let source = r#"
///     [[method]]
///     name = "main"
///     entry = true
///     body = [
///         { op = "const", name = "x", value = 41 },
///         { op = "call", target = "inc", args = ["x"], name = "y" },
///         { op = "return", value = "y" },
///     ]
///
///     [[method]]
///     name = "inc"
///     params = 1
///     body = [
///         { op = "const", name = "one", value = 1 },
///         { op = "arith", kind = "add", lhs = "p0", rhs = "one", name = "r" },
///         { op = "return", value = "r" },
///     ]
/// "#;
///
/// let (universe, parser) = Program::parse(source).unwrap().build().unwrap();
/// let config = InliningConfig { threads: 2, ..Default::default() };
/// let queue = CompileQueue::new(universe, parser.clone(), parser, SizeEstimateBackend::default(), config).unwrap();
/// let summary = queue.finish().unwrap();
/// assert_eq!(summary.compiled, 1);
/// ```

pub mod config;
pub mod error;
pub mod inlining;
pub mod ir;
pub mod program;
pub mod queue;
pub mod scheduler;
pub mod universe;

pub use config::{ConfigError, InliningConfig};
pub use error::{SchedulerError, SchedulerResult};
pub use inlining::{
    BenefitCostStrategy, CalleeRecord, GraphCostModel, Policy, PriorityStrategy, SpeculativeInliner,
};
pub use queue::{CompileQueue, CompileSummary};
pub use scheduler::{RoundScheduler, ScheduleReport};
pub use universe::{MethodFlags, MethodUnit, UnitId, Universe};
