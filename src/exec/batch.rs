use std::future::Future;
use std::time::Duration;

use futures::future::join_all;

/// Bounded-parallelism scheduler over a sequence.
///
/// Items are processed in batches of `batch_size`; within a batch all workers
/// run concurrently, and the next batch starts only after every worker has
/// settled and `delay` has elapsed. Output order matches input order, and one
/// worker's failure never cancels its siblings (workers encode failure in
/// their own output type, e.g. `Option` or `Result`).
#[derive(Debug, Clone, Copy)]
pub struct BatchExecutor {
    batch_size: usize,
    delay: Duration,
}

impl BatchExecutor {
    pub fn new(batch_size: usize, delay: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            delay,
        }
    }

    pub async fn execute<T, U, F, Fut>(&self, items: Vec<T>, worker: F) -> Vec<U>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = U>,
    {
        let mut results = Vec::with_capacity(items.len());
        let mut iter = items.into_iter().peekable();

        while iter.peek().is_some() {
            let batch: Vec<T> = iter.by_ref().take(self.batch_size).collect();
            let outputs = join_all(batch.into_iter().map(&worker)).await;
            results.extend(outputs);

            if iter.peek().is_some() && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn preserves_input_order() {
        let exec = BatchExecutor::new(3, Duration::ZERO);
        let results = exec
            .execute((0..10).collect(), |n| async move { n * 2 })
            .await;

        assert_eq!(results, (0..10).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_batch_size() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let exec = BatchExecutor::new(3, Duration::ZERO);
        exec.execute((0..12).collect::<Vec<u32>>(), |_| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn one_failure_does_not_cancel_siblings() {
        let exec = BatchExecutor::new(4, Duration::ZERO);
        let results = exec
            .execute((0..4).collect::<Vec<u32>>(), |n| async move {
                if n == 2 {
                    None
                } else {
                    Some(n)
                }
            })
            .await;

        assert_eq!(results, vec![Some(0), Some(1), None, Some(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn paces_between_batches() {
        let exec = BatchExecutor::new(2, Duration::from_millis(300));
        let start = tokio::time::Instant::now();

        exec.execute((0..6).collect::<Vec<u32>>(), |n| async move { n })
            .await;

        // Three batches, two inter-batch delays.
        assert!(start.elapsed() >= Duration::from_millis(600));
    }
}
