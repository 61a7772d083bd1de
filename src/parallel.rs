//! Data-parallel loops over contiguous index ranges.
//!
//! Evaluators use these helpers to spread per-observation work over several
//! threads. Every call blocks until all work it started has finished.
//!
//! The range is split into `num_threads` contiguous chunks of `len / num_threads`
//! indices, and the remainder is assigned to the last chunk. [`reduce`] folds
//! each chunk separately and then merges the partial results, so the combiner
//! must be associative (and should be commutative). Floating point sums are not
//! guaranteed to be bit-identical between serial and parallel policies.

use std::{fmt, ops::Range, sync::Arc, thread};

use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;

pub const DEFAULT_NUM_THREADS: usize = 4;
pub const DEFAULT_MIN_SIZE: usize = 100_000;

#[derive(Error, Debug)]
pub enum ParallelError {
    #[error("Could not start worker pool")]
    PoolBuild(#[from] rayon::ThreadPoolBuildError),
}

/// When and how wide a range is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadSettings {
    /// Number of chunks (and worker units) a large range is split into.
    pub num_threads: usize,
    /// Ranges shorter than this run on the calling thread.
    pub min_size: usize,
}

impl Default for ThreadSettings {
    fn default() -> Self {
        Self {
            num_threads: DEFAULT_NUM_THREADS,
            min_size: DEFAULT_MIN_SIZE,
        }
    }
}

impl ThreadSettings {
    fn parallel_parts(&self, len: usize) -> Option<usize> {
        if self.num_threads > 1 && len >= self.min_size {
            Some(self.num_threads)
        } else {
            None
        }
    }
}

/// A long-lived set of worker threads that is reused between calls.
pub struct WorkerPool {
    pool: ThreadPool,
    settings: ThreadSettings,
}

impl WorkerPool {
    pub fn new(settings: ThreadSettings) -> Result<Self, ParallelError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(settings.num_threads.max(1))
            .thread_name(|i| format!("regmcmc-worker-{}", i))
            .build()?;
        Ok(Self { pool, settings })
    }

    pub fn settings(&self) -> ThreadSettings {
        self.settings
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("settings", &self.settings)
            .field("current_num_threads", &self.pool.current_num_threads())
            .finish()
    }
}

/// How [`for_each`] and [`reduce`] execute their work.
#[derive(Debug, Clone)]
pub enum ExecutionPolicy {
    /// Everything runs on the calling thread.
    Serial,
    /// Fresh scoped threads are spawned on every call that is large enough.
    ///
    /// Correct, but the thread start-up cost is paid again on every call.
    Threads(ThreadSettings),
    /// Chunks are submitted to a reusable [`WorkerPool`].
    ///
    /// Preferred for evaluators that are called once per sampler iteration.
    Pool(Arc<WorkerPool>),
}

impl ExecutionPolicy {
    pub fn threads(num_threads: usize, min_size: usize) -> Self {
        ExecutionPolicy::Threads(ThreadSettings {
            num_threads,
            min_size,
        })
    }

    pub fn pool(settings: ThreadSettings) -> Result<Self, ParallelError> {
        Ok(ExecutionPolicy::Pool(Arc::new(WorkerPool::new(settings)?)))
    }

    /// The number of chunks a range of length `len` is split into, or `None`
    /// if it runs serially.
    pub fn parallel_parts(&self, len: usize) -> Option<usize> {
        match self {
            ExecutionPolicy::Serial => None,
            ExecutionPolicy::Threads(settings) => settings.parallel_parts(len),
            ExecutionPolicy::Pool(pool) => pool.settings.parallel_parts(len),
        }
    }
}

/// Split `range` into `parts` contiguous chunks.
///
/// All chunks have length `len / parts`, except the last one, which also
/// receives the remainder.
pub fn partition(range: Range<usize>, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let chunk_size = range.len() / parts;
    let mut chunks = Vec::with_capacity(parts);
    let mut start = range.start;
    for _ in 0..parts - 1 {
        chunks.push(start..start + chunk_size);
        start += chunk_size;
    }
    chunks.push(start..range.end.max(start));
    chunks
}

/// Call `op` for every index in `range`.
pub fn for_each<F>(range: Range<usize>, op: F, policy: &ExecutionPolicy)
where
    F: Fn(usize) + Sync,
{
    let Some(parts) = policy.parallel_parts(range.len()) else {
        range.for_each(op);
        return;
    };
    let op = &op;
    let chunks = partition(range, parts);

    match policy {
        ExecutionPolicy::Pool(pool) => pool.pool.scope(|scope| {
            for chunk in chunks {
                scope.spawn(move |_| chunk.for_each(op));
            }
        }),
        _ => thread::scope(|scope| {
            let mut chunks = chunks.into_iter();
            let last = chunks.next_back();
            for chunk in chunks {
                scope.spawn(move || chunk.for_each(op));
            }
            // the calling thread takes the last chunk
            if let Some(chunk) = last {
                chunk.for_each(op);
            }
        }),
    }
}

/// Combine `transform(i)` for every index in `range` into `initial`.
///
/// `combiner` must be associative. Under a parallel policy every chunk is
/// reduced on its own and the partial results are then folded into `initial`
/// in chunk order.
pub fn reduce<T, M, C>(
    range: Range<usize>,
    initial: T,
    transform: M,
    combiner: C,
    policy: &ExecutionPolicy,
) -> T
where
    T: Send,
    M: Fn(usize) -> T + Sync,
    C: Fn(T, T) -> T + Sync,
{
    let Some(parts) = policy.parallel_parts(range.len()) else {
        return range.map(&transform).fold(initial, &combiner);
    };

    let fold_chunk = |chunk: Range<usize>| chunk.map(&transform).reduce(&combiner);
    let fold_chunk = &fold_chunk;
    let chunks = partition(range, parts);
    let mut partials: Vec<Option<T>> = chunks.iter().map(|_| None).collect();

    match policy {
        ExecutionPolicy::Pool(pool) => pool.pool.scope(|scope| {
            for (chunk, slot) in chunks.into_iter().zip(partials.iter_mut()) {
                scope.spawn(move |_| *slot = fold_chunk(chunk));
            }
        }),
        _ => thread::scope(|scope| {
            let mut work = chunks.into_iter().zip(partials.iter_mut());
            let last = work.next_back();
            for (chunk, slot) in work {
                scope.spawn(move || *slot = fold_chunk(chunk));
            }
            if let Some((chunk, slot)) = last {
                *slot = fold_chunk(chunk);
            }
        }),
    }

    partials.into_iter().flatten().fold(initial, &combiner)
}

/// Scatter-add: `out[segments[n]] += transform(n)` for every entry `n`.
///
/// Runs serially, since different entries may target the same segment.
pub fn segmented_reduce<F>(segments: &[usize], transform: F, out: &mut [f64])
where
    F: Fn(usize) -> f64,
{
    for (n, &segment) in segments.iter().enumerate() {
        out[segment] += transform(n);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use approx::assert_relative_eq;
    use itertools::Itertools;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn partition_puts_remainder_last() {
        assert_eq!(partition(0..10, 3), vec![0..3, 3..6, 6..10]);
        assert_eq!(partition(5..9, 4), vec![5..6, 6..7, 7..8, 8..9]);
        assert_eq!(partition(0..2, 4), vec![0..0, 0..0, 0..0, 0..2]);
        assert_eq!(partition(0..0, 1), vec![0..0]);
    }

    proptest! {
        #[test]
        fn partition_covers_range(start in 0usize..1000, len in 0usize..5000, parts in 1usize..16) {
            let chunks = partition(start..start + len, parts);
            prop_assert_eq!(chunks.len(), parts);
            prop_assert_eq!(chunks[0].start, start);
            prop_assert_eq!(chunks[parts - 1].end, start + len);
            for (a, b) in chunks.iter().tuple_windows() {
                prop_assert_eq!(a.end, b.start);
            }
        }
    }

    #[test]
    fn small_ranges_stay_serial() {
        let policy = ExecutionPolicy::threads(4, 100);
        assert_eq!(policy.parallel_parts(99), None);
        assert_eq!(policy.parallel_parts(100), Some(4));
        assert_eq!(ExecutionPolicy::threads(1, 0).parallel_parts(1000), None);
        assert_eq!(ExecutionPolicy::Serial.parallel_parts(usize::MAX), None);
    }

    #[test]
    fn for_each_visits_every_index_once() {
        let policies = [
            ExecutionPolicy::Serial,
            ExecutionPolicy::threads(3, 10),
            ExecutionPolicy::pool(ThreadSettings {
                num_threads: 3,
                min_size: 10,
            })
            .unwrap(),
        ];
        for policy in policies.iter() {
            let hits: Vec<AtomicUsize> = (0..1001).map(|_| AtomicUsize::new(0)).collect();
            for_each(
                0..1001,
                |i| {
                    hits[i].fetch_add(1, Ordering::Relaxed);
                },
                policy,
            );
            assert!(hits.iter().all(|hit| hit.load(Ordering::Relaxed) == 1));
        }
    }

    #[test]
    fn reduce_merges_partials_into_initial() {
        let policy = ExecutionPolicy::threads(4, 1);
        let total = reduce(0..100, 1000usize, |i| i, |a, b| a + b, &policy);
        assert_eq!(total, 1000 + 4950);

        let max = reduce(
            0..10_000,
            f64::NEG_INFINITY,
            |i| ((i as f64) * 0.37).sin(),
            f64::max,
            &policy,
        );
        let expected = (0..10_000)
            .map(|i| ((i as f64) * 0.37).sin())
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(max, expected);
    }

    #[test]
    fn reduce_handles_more_threads_than_items() {
        let policy = ExecutionPolicy::pool(ThreadSettings {
            num_threads: 8,
            min_size: 0,
        })
        .unwrap();
        assert_eq!(reduce(0..3, 0usize, |i| i + 1, |a, b| a + b, &policy), 6);
        assert_eq!(reduce(0..0, 7usize, |i| i, |a, b| a + b, &policy), 7);
    }

    #[test]
    fn reduce_matches_serial_sum() {
        let policy = ExecutionPolicy::threads(4, 100);
        let transform = |i: usize| 1.0 / (1.0 + i as f64);
        let serial = reduce(0..50_000, 0.0, transform, |a, b| a + b, &ExecutionPolicy::Serial);
        let parallel = reduce(0..50_000, 0.0, transform, |a, b| a + b, &policy);
        assert_relative_eq!(serial, parallel, max_relative = 1e-12);
    }

    #[test]
    fn segmented_reduce_scatters() {
        let segments = [0, 2, 0, 1, 2];
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let mut out = vec![0.5; 3];
        segmented_reduce(&segments, |n| values[n], &mut out);
        assert_eq!(out, vec![4.5, 4.5, 7.5]);
    }
}
