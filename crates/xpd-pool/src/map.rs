use rayon::prelude::*;
use tracing::debug;
use xpd_core::{ErrorInfo, XpdError};

use crate::progress::Progress;
use crate::workers::{chunk_size, Workers};

/// Applies `f` to every item and returns the results in input order.
///
/// With [`Workers::Count`] of `0` or `1` the items run one after another on
/// the calling thread. Otherwise a dedicated pool of worker threads is built
/// and items are handed out in chunks of [`chunk_size`]. Progress advances by
/// one per finished item. The first error aborts the map once in-flight items
/// drain; panics resume on the caller. Nothing is retried.
pub fn map<T, R, F>(
    f: F,
    items: &[T],
    workers: Workers,
    progress: &dyn Progress,
) -> Result<Vec<R>, XpdError>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R, XpdError> + Sync,
{
    let threads = workers.threads();
    let result = if threads <= 1 {
        sequential(&f, items, progress)
    } else {
        parallel(&f, items, threads, progress)
    };
    progress.finish();
    result
}

fn sequential<T, R, F>(f: &F, items: &[T], progress: &dyn Progress) -> Result<Vec<R>, XpdError>
where
    F: Fn(&T) -> Result<R, XpdError>,
{
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        results.push(f(item)?);
        progress.inc(1);
    }
    Ok(results)
}

fn parallel<T, R, F>(
    f: &F,
    items: &[T],
    threads: usize,
    progress: &dyn Progress,
) -> Result<Vec<R>, XpdError>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R, XpdError> + Sync,
{
    let chunk = chunk_size(items.len(), threads);
    debug!(items = items.len(), threads, chunk, "starting worker pool");
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|index| format!("xpd-worker-{index}"))
        .build()
        .map_err(|err| XpdError::Execution(ErrorInfo::new("thread_pool", err.to_string())))?;
    pool.install(|| {
        items
            .par_iter()
            .with_min_len(chunk)
            .map(|item| {
                let result = f(item);
                progress.inc(1);
                result
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{NullProgress, RecordingProgress};

    #[test]
    fn identity_preserves_items() {
        for workers in [Workers::All, Workers::Count(0), Workers::Count(1), Workers::Count(4)] {
            for len in [0usize, 1, 37] {
                let items: Vec<usize> = (0..len).collect();
                let out = map(|x: &usize| Ok(*x), &items, workers, &NullProgress).unwrap();
                assert_eq!(out, items, "workers={workers} len={len}");
            }
        }
    }

    #[test]
    fn order_survives_uneven_durations() {
        let items: Vec<u64> = (0..24).collect();
        let out = map(
            |x: &u64| {
                std::thread::sleep(std::time::Duration::from_millis((24 - x) % 5));
                Ok(x * 2)
            },
            &items,
            Workers::Count(4),
            &NullProgress,
        )
        .unwrap();
        assert_eq!(out, items.iter().map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn progress_counts_items_not_chunks() {
        let items: Vec<u32> = (0..500).collect();
        let progress = RecordingProgress::new();
        map(|x: &u32| Ok(*x), &items, Workers::Count(3), &progress).unwrap();
        assert_eq!(progress.position(), 500);
        assert!(progress.increments().iter().all(|&d| d == 1));
        assert!(progress.is_finished());
    }

    #[test]
    fn errors_propagate() {
        let items: Vec<i32> = (0..40).collect();
        for workers in [Workers::Count(1), Workers::Count(4)] {
            let err = map(
                |x: &i32| {
                    if *x == 17 {
                        Err(XpdError::Execution(ErrorInfo::new("task_failed", "boom")))
                    } else {
                        Ok(*x)
                    }
                },
                &items,
                workers,
                &NullProgress,
            )
            .unwrap_err();
            assert_eq!(err.code(), "task_failed");
        }
    }

    #[test]
    fn sequential_stops_at_first_error() {
        let items = vec![1, 2, 3];
        let progress = RecordingProgress::new();
        let result: Result<Vec<i32>, _> = map(
            |x: &i32| {
                if *x == 2 {
                    Err(XpdError::Execution(ErrorInfo::new("task_failed", "two")))
                } else {
                    Ok(*x)
                }
            },
            &items,
            Workers::Count(0),
            &progress,
        );
        assert!(result.is_err());
        assert_eq!(progress.position(), 1);
    }
}
