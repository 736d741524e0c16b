//! Bounded background task queue
//!
//! Work triggered by a request (matrix updates, profile rebuilds, log writes)
//! runs here instead of on detached tasks, so callers can wait for it to
//! finish and shutdown can drain it.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{RecommendError, Result};

/// Concurrency-limited set of background tasks
pub struct TaskQueue {
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl TaskQueue {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            tasks: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue a task; it starts once a permit is free
    ///
    /// Errors are logged under `name`. Fails with `Shutdown` after `shutdown`.
    pub fn spawn<F>(&self, name: &'static str, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        // checked under the lock so a task is either rejected or seen by drain
        let mut tasks = self.tasks.lock();
        if self.closed.load(Ordering::SeqCst) {
            warn!(task = name, "Rejecting background task, queue is shut down");
            return Err(RecommendError::Shutdown);
        }

        let permits = Arc::clone(&self.permits);

        // reap finished tasks so the set does not grow unbounded
        while let Some(finished) = tasks.try_join_next() {
            Self::log_join(finished);
        }

        tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            match task.await {
                Ok(()) => debug!(task = name, "Background task completed"),
                Err(e) => error!(task = name, error = %e, "Background task failed"),
            }
        });
        Ok(())
    }

    /// Number of tasks not yet reaped
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Wait until every queued task, including ones spawned while waiting, has finished
    pub async fn drain(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.tasks.lock());
            if batch.is_empty() {
                return;
            }
            while let Some(finished) = batch.join_next().await {
                Self::log_join(finished);
            }
        }
    }

    /// Stop accepting work and wait for in-flight tasks
    pub async fn shutdown(&self) {
        let pending = {
            let tasks = self.tasks.lock();
            self.closed.store(true, Ordering::SeqCst);
            tasks.len()
        };
        info!(pending, "Draining background tasks");
        self.drain().await;
        info!("Background task queue stopped");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn log_join(result: std::result::Result<(), tokio::task::JoinError>) {
        if let Err(e) = result {
            if e.is_panic() {
                error!(error = %e, "Background task panicked");
            } else {
                warn!(error = %e, "Background task cancelled");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_drain_waits_for_all_tasks() {
        let queue = TaskQueue::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            queue
                .spawn("increment", async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }

        queue.drain().await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let queue = TaskQueue::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            queue
                .spawn("bounded", async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }

        queue.drain().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let queue = TaskQueue::new(4);
        queue
            .spawn("failing", async { Err(RecommendError::Internal("boom".into())) })
            .unwrap();
        queue
            .spawn("panicking", async {
                if true {
                    panic!("task panic");
                }
                Ok(())
            })
            .unwrap();
        queue.spawn("fine", async { Ok(()) }).unwrap();

        queue.drain().await;
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let queue = TaskQueue::new(1);
        queue.shutdown().await;

        assert!(queue.is_closed());
        let result = queue.spawn("late", async { Ok(()) });
        assert!(matches!(result, Err(RecommendError::Shutdown)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shutdown_awaits_every_accepted_task() {
        let queue = Arc::new(TaskQueue::new(8));
        let accepted = Arc::new(AtomicUsize::new(0));
        let executed = Arc::new(AtomicUsize::new(0));

        let spawners: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let accepted = Arc::clone(&accepted);
                let executed = Arc::clone(&executed);
                tokio::spawn(async move {
                    loop {
                        let executed = Arc::clone(&executed);
                        let spawned = queue.spawn("racing", async move {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            executed.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        });
                        if spawned.is_err() {
                            break;
                        }
                        accepted.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.shutdown().await;
        for spawner in spawners {
            spawner.await.unwrap();
        }

        assert_eq!(queue.pending(), 0);
        assert_eq!(
            executed.load(Ordering::SeqCst),
            accepted.load(Ordering::SeqCst)
        );
    }
}
