//! # Job System
//!
//! Parallel-for dispatches over a shared rayon pool.
//!
//! ```text
//!   scope ─┬─ dispatch(N, G, job) ── ceil(N/G) groups, any order
//!          ├─ dispatch(...)
//!          └─ join ── happens-before for everything spawned above
//! ```
//!
//! Jobs of one group run sequentially on one worker and share a scratch
//! value created for that group, so a group can reserve output space once
//! from its last job. There is no ordering between groups and no
//! cancellation.

use std::sync::Arc;

use crate::error::RenderResult;

/// Converts an array length into a dispatch job count.
///
/// # Panics
///
/// Panics if `len` does not fit in 32 bits.
#[must_use]
pub fn job_count(len: usize) -> u32 {
    assert!(u32::try_from(len).is_ok(), "dispatch of {len} jobs exceeds u32");
    #[allow(clippy::cast_possible_truncation)]
    let count = len as u32;
    count
}

/// Position of one job inside a dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobArgs {
    /// Index of the job in the dispatch.
    pub job_index: u32,
    /// Index of the group.
    pub group_id: u32,
    /// Index of the job inside its group.
    pub group_index: u32,
    /// First job of its group.
    pub is_first_in_group: bool,
    /// Last job of its group.
    pub is_last_in_group: bool,
}

/// Shared worker pool.
pub struct JobSystem {
    pool: rayon::ThreadPool,
}

impl JobSystem {
    /// Creates a pool of `threads` workers; 0 picks one per core.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker threads cannot be spawned.
    pub fn new(threads: usize) -> RenderResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("aperture-worker-{i}"))
            .build()?;
        tracing::info!(threads = pool.current_num_threads(), "worker pool ready");
        Ok(Self { pool })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `op`, then waits for every dispatch it issued.
    pub fn scope<'scope, R, OP>(&self, op: OP) -> R
    where
        OP: FnOnce(&JobContext<'_, 'scope>) -> R + Send,
        R: Send,
    {
        self.pool.scope(|scope| op(&JobContext { scope }))
    }

    /// Single dispatch followed by its join.
    pub fn dispatch<'scope, S, F>(&self, job_count: u32, group_size: u32, job: F)
    where
        S: Default,
        F: Fn(JobArgs, &mut S) + Send + Sync + 'scope,
    {
        self.scope(|ctx| ctx.dispatch(job_count, group_size, job));
    }
}

/// Handle for issuing dispatches inside [`JobSystem::scope`].
pub struct JobContext<'a, 'scope> {
    scope: &'a rayon::Scope<'scope>,
}

impl<'scope> JobContext<'_, 'scope> {
    /// Splits `job_count` jobs into groups of `group_size` and spawns one
    /// task per group. Returns immediately.
    ///
    /// # Panics
    ///
    /// Panics if `group_size` is zero.
    pub fn dispatch<S, F>(&self, job_count: u32, group_size: u32, job: F)
    where
        S: Default,
        F: Fn(JobArgs, &mut S) + Send + Sync + 'scope,
    {
        assert!(group_size > 0, "dispatch group size must be non-zero");
        if job_count == 0 {
            return;
        }
        let job = Arc::new(job);
        for group_id in 0..job_count.div_ceil(group_size) {
            let job = Arc::clone(&job);
            self.scope.spawn(move |_| {
                let start = group_id * group_size;
                let end = (start + group_size).min(job_count);
                let mut scratch = S::default();
                for job_index in start..end {
                    let args = JobArgs {
                        job_index,
                        group_id,
                        group_index: job_index - start,
                        is_first_in_group: job_index == start,
                        is_last_in_group: job_index + 1 == end,
                    };
                    job(args, &mut scratch);
                }
            });
        }
    }
}
