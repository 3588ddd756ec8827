// src/engine/pool.rs
//
// Global thread pool for batch encoding.
//
// One pool is shared by every batch; it is sized from available_parallelism()
// (which respects cgroup CPU quotas) and built lazily on first use. If the
// pool cannot be built, batches run on rayon's global pool instead.

use rayon::ThreadPool;
use std::sync::OnceLock;
use tracing::warn;

/// Minimum number of worker threads.
const MIN_POOL_THREADS: usize = 1;

static GLOBAL_THREAD_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

/// Worker count for the batch pool.
pub fn pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MIN_POOL_THREADS)
        .max(MIN_POOL_THREADS)
}

/// The shared batch pool, or `None` when it could not be created.
pub fn get_pool() -> Option<&'static ThreadPool> {
    GLOBAL_THREAD_POOL
        .get_or_init(|| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(pool_size())
                .thread_name(|i| format!("imgsqueeze-{i}"))
                .build()
                .map_err(|e| warn!(error = %e, "batch pool unavailable; using rayon global pool"))
                .ok()
        })
        .as_ref()
}

/// Run `f` inside the batch pool (or the rayon global pool as a fallback).
pub fn install<R, F>(f: F) -> R
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    match get_pool() {
        Some(pool) => pool.install(f),
        None => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_is_created_once() {
        let a = get_pool().map(|p| p as *const ThreadPool);
        let b = get_pool().map(|p| p as *const ThreadPool);
        assert_eq!(a, b);
    }

    #[test]
    fn test_install_runs_closure() {
        assert_eq!(install(|| 40 + 2), 42);
        assert!(pool_size() >= MIN_POOL_THREADS);
    }
}
