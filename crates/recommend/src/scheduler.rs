//! Periodic background jobs
//!
//! Three independent loops: full model retrain, batched refresh of recently
//! active users' profiles, and retention cleanup. Each run executes on its
//! own task so a failing or panicking run is logged and the loop carries on.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::config::ScheduleConfig;
use crate::error::Result;
use crate::matrix_factorization::TrainingReport;
use crate::service::{CleanupReport, RecommendationService, RefreshReport};

/// Drives the scheduled jobs of a [`RecommendationService`]
pub struct ScheduledRetrainer {
    service: RecommendationService,
    schedule: ScheduleConfig,
}

/// Running scheduler; dropping it leaves the loops running until `stop`
pub struct RetrainerHandle {
    shutdown: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
}

impl RetrainerHandle {
    /// Signal every loop to exit and wait for them
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for handle in self.loops {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler loop terminated abnormally");
            }
        }
        info!("Scheduled jobs stopped");
    }
}

impl ScheduledRetrainer {
    pub fn new(service: RecommendationService, schedule: ScheduleConfig) -> Self {
        Self { service, schedule }
    }

    pub async fn run_retrain_once(&self) -> Result<TrainingReport> {
        self.service.train_model().await
    }

    pub async fn run_profile_refresh_once(&self) -> Result<RefreshReport> {
        self.service
            .refresh_active_profiles(
                self.schedule.active_user_window_hours,
                self.schedule.refresh_concurrency,
            )
            .await
    }

    pub async fn run_cleanup_once(&self) -> Result<CleanupReport> {
        self.service.cleanup(self.schedule.retention_days).await
    }

    /// Spawn the three loops; the first run of each happens one period from now
    pub fn start(self) -> RetrainerHandle {
        let (shutdown, receiver) = watch::channel(false);
        let schedule = self.schedule.clone();

        info!(
            retrain_secs = schedule.retrain_interval.as_secs(),
            refresh_secs = schedule.profile_refresh_interval.as_secs(),
            cleanup_secs = schedule.cleanup_interval.as_secs(),
            "Starting scheduled jobs"
        );

        let retrain = {
            let service = self.service.clone();
            spawn_loop("model_retrain", schedule.retrain_interval, receiver.clone(), move || {
                let service = service.clone();
                async move { service.train_model().await.map(|_| ()) }
            })
        };

        let refresh = {
            let service = self.service.clone();
            let hours = schedule.active_user_window_hours;
            let concurrency = schedule.refresh_concurrency;
            spawn_loop(
                "profile_refresh",
                schedule.profile_refresh_interval,
                receiver.clone(),
                move || {
                    let service = service.clone();
                    async move {
                        service
                            .refresh_active_profiles(hours, concurrency)
                            .await
                            .map(|_| ())
                    }
                },
            )
        };

        let cleanup = {
            let service = self.service.clone();
            let retention_days = schedule.retention_days;
            spawn_loop("retention_cleanup", schedule.cleanup_interval, receiver, move || {
                let service = service.clone();
                async move { service.cleanup(retention_days).await.map(|_| ()) }
            })
        };

        RetrainerHandle {
            shutdown,
            loops: vec![retrain, refresh, cleanup],
        }
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            info!(job = name, "Starting scheduled job");
            let started = std::time::Instant::now();
            match tokio::spawn(job()).await {
                Ok(Ok(())) => info!(
                    job = name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Scheduled job completed"
                ),
                Ok(Err(e)) => error!(job = name, error = %e, "Scheduled job failed"),
                Err(e) => error!(job = name, error = %e, "Scheduled job panicked"),
            }
        }

        info!(job = name, "Scheduler loop exited");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::config::RecommendConfig;
    use crate::storage::{InMemoryRecommendationStore, RecommendationStore};
    use crate::types::{BehaviorEvent, BehaviorKind, ItemKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn service(store: Arc<InMemoryRecommendationStore>) -> RecommendationService {
        RecommendationService::new(
            store,
            Arc::new(InMemoryCache::new()),
            RecommendConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_run_once_entry_points() {
        let store = Arc::new(InMemoryRecommendationStore::new());
        for (user, item) in [(1, 10), (1, 11), (2, 10), (1, 12)] {
            let event = BehaviorEvent::new(user, item, ItemKind::Article, BehaviorKind::Like)
                .with_tags(["rust"]);
            store.insert_behavior(&event).await.unwrap();
        }

        let retrainer = ScheduledRetrainer::new(service(store.clone()), ScheduleConfig::default());

        let report = retrainer.run_retrain_once().await.unwrap();
        assert!(report.epochs_run > 0);

        let refresh = retrainer.run_profile_refresh_once().await.unwrap();
        assert_eq!(refresh.total, 2);
        assert_eq!(refresh.succeeded, 2);
        assert_eq!(store.stored_profile_count(), 2);

        let cleanup = retrainer.run_cleanup_once().await.unwrap();
        assert_eq!(cleanup.behaviors_deleted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_failures_and_stops() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);

        let counter = Arc::clone(&runs);
        let handle = spawn_loop("flaky", Duration::from_secs(60), rx, move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n % 2 == 0 {
                    Err(crate::error::RecommendError::Internal("flaky".into()))
                } else {
                    Ok(())
                }
            }
        });

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(61)).await;
        }
        assert!(runs.load(Ordering::SeqCst) >= 2);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop() {
        let store = Arc::new(InMemoryRecommendationStore::new());
        let handle = ScheduledRetrainer::new(service(store), ScheduleConfig::default()).start();
        handle.stop().await;
    }
}
