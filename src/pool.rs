//! The shared worker pool.
//!
//! One fixed-size pool is built per run and injected into every parallel
//! phase. Work is statically partitioned per folder; the ledger and class
//! dictionary are frozen before any worker starts, and each worker writes
//! only its own output files, so the write path needs no locking.

use rayon::prelude::*;

use crate::error::GridlabelError;

/// A fixed-size thread pool for per-folder fan-out.
pub struct WorkerPool {
    inner: rayon::ThreadPool,
}

impl WorkerPool {
    /// Builds a pool sized to the machine, leaving one core free.
    pub fn with_default_size() -> Result<Self, GridlabelError> {
        let cores = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1);
        Self::with_size(cores.saturating_sub(1).max(1))
    }

    /// Builds a pool with an explicit thread count (clamped to at least 1).
    pub fn with_size(threads: usize) -> Result<Self, GridlabelError> {
        let inner = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .build()?;
        Ok(Self { inner })
    }

    pub fn thread_count(&self) -> usize {
        self.inner.current_num_threads()
    }

    /// Maps `work` over `items` on the pool and collects results in input
    /// order. Items are independent; no state is shared between them.
    pub fn map<I, O, F>(&self, items: Vec<I>, work: F) -> Vec<O>
    where
        I: Send,
        O: Send,
        F: Fn(I) -> O + Sync + Send,
    {
        self.inner
            .install(|| items.into_par_iter().map(work).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_has_at_least_one_thread() {
        let pool = WorkerPool::with_default_size().expect("build pool");
        assert!(pool.thread_count() >= 1);
    }

    #[test]
    fn explicit_size_is_clamped() {
        let pool = WorkerPool::with_size(0).expect("build pool");
        assert_eq!(pool.thread_count(), 1);
    }

    #[test]
    fn map_preserves_input_order() {
        let pool = WorkerPool::with_size(4).expect("build pool");
        let doubled = pool.map((0..100).collect(), |n: u32| n * 2);
        assert_eq!(doubled, (0..100).map(|n| n * 2).collect::<Vec<_>>());
    }
}
