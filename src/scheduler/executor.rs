//! Bounded worker pool for per-unit tasks
//!
//! Each call to [`TaskExecutor::run_all`] is one scan sub-pass: the
//! tasks run on the pool and the call returns only after all of them have
//! joined, which is the barrier between scanning and publishing. The
//! first failing task stops the remaining ones from being started.

use crate::error::{SchedulerError, SchedulerResult};
use crate::universe::UnitId;
use rayon::prelude::*;

pub struct TaskExecutor {
    pool: rayon::ThreadPool,
}

impl TaskExecutor {
    /// Create a pool with `threads` workers (0 means one per CPU).
    pub fn new(threads: usize) -> SchedulerResult<Self> {
        let threads = if threads == 0 { num_cpus::get() } else { threads };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("aotinline-worker-{}", i))
            .build()
            .map_err(|e| SchedulerError::ThreadPool(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `task` for every unit and join.
    pub fn run_all<F>(&self, units: &[UnitId], task: F) -> SchedulerResult<()>
    where
        F: Fn(UnitId) -> SchedulerResult<()> + Sync,
    {
        self.pool
            .install(|| units.par_iter().try_for_each(|&unit| task(unit)))
    }

    /// Run `task` for every item and join, keeping results in input order.
    pub fn map_all<I, T, F>(&self, items: &[I], task: F) -> SchedulerResult<Vec<T>>
    where
        I: Copy + Sync,
        T: Send,
        F: Fn(I) -> SchedulerResult<T> + Sync,
    {
        self.pool
            .install(|| items.par_iter().map(|&item| task(item)).collect())
    }
}
