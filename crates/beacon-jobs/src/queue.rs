use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Deferred task queue over the tokio timer. Jobs are fire-and-forget:
/// once enqueued they always run after the delay, and each job decides at
/// fire time whether it still has anything to do. Nothing is cancellable.
#[derive(Clone, Default)]
pub struct TaskQueue;

impl TaskQueue {
    pub fn new() -> Self {
        Self
    }

    pub fn enqueue<F>(&self, run_after: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!("enqueueing job to run in {:?}", run_after);
        tokio::spawn(async move {
            tokio::time::sleep(run_after).await;
            job.await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn job_runs_after_the_delay_not_before() {
        let queue = TaskQueue::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_job = fired.clone();

        queue.enqueue(Duration::from_secs(60), async move {
            fired_job.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
