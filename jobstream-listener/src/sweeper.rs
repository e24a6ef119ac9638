//! Periodic eviction of terminal job records.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use jobstream_config::JobsConfig;
use jobstream_registry::{JobRegistry, PruneReport};

/// Enforces the retention window and size bound on the registry.
///
/// Each tick computes `cutoff = now - retention` and prunes. A shortfall
/// (registry over capacity with only in-flight records left) is logged and
/// simply retried on the next tick.
pub struct CleanupSweeper {
    registry: Arc<JobRegistry>,
    interval: Duration,
    retention_secs: i64,
    max_jobs: usize,
}

impl CleanupSweeper {
    pub fn from_config(registry: Arc<JobRegistry>, jobs: &JobsConfig) -> Self {
        Self {
            registry,
            interval: Duration::from_secs(jobs.job_cleanup_interval),
            retention_secs: jobs.job_retention as i64,
            max_jobs: jobs.max_jobs_in_memory,
        }
    }

    /// Run one prune pass immediately.
    pub async fn sweep_once(&self) -> PruneReport {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.retention_secs);
        let report = self.registry.prune(cutoff, self.max_jobs).await;
        if report.over_capacity {
            warn!(
                remaining = report.remaining,
                max_jobs = self.max_jobs,
                "registry over capacity with no evictable records, retrying next tick"
            );
        } else if report.expired > 0 || report.evicted > 0 {
            debug!(
                expired = report.expired,
                evicted = report.evicted,
                remaining = report.remaining,
                "cleanup sweep finished"
            );
        }
        report
    }

    /// Spawn the sweep loop until the token is cancelled.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately and prunes nothing fresh.
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                }
            }
            debug!("cleanup sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobstream_config::Config;
    use jobstream_registry::{Document, JobStatus};

    async fn settle(registry: &JobRegistry, job_id: &str) {
        registry.create(job_id, Document::new()).await;
        registry
            .transition(job_id, JobStatus::Running, None, None)
            .await
            .unwrap();
        registry
            .transition(job_id, JobStatus::Completed, None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fresh_terminal_records_survive_a_sweep() {
        let registry = Arc::new(JobRegistry::new());
        settle(&registry, "fresh").await;

        let sweeper = CleanupSweeper::from_config(registry.clone(), &Config::default().jobs);
        let report = sweeper.sweep_once().await;
        assert_eq!(report.expired, 0);
        assert_eq!(report.remaining, 1);
    }

    #[tokio::test]
    async fn capacity_pressure_evicts_terminal_records_only() {
        let registry = Arc::new(JobRegistry::new());
        settle(&registry, "done").await;
        registry.create("busy", Document::new()).await;
        registry
            .transition("busy", JobStatus::Running, None, None)
            .await
            .unwrap();

        let mut jobs = Config::default().jobs;
        jobs.max_jobs_in_memory = 1;
        let sweeper = CleanupSweeper::from_config(registry.clone(), &jobs);

        let report = sweeper.sweep_once().await;
        assert_eq!(report.evicted, 1);
        assert!(registry.get("done").await.is_none());
        assert_eq!(
            registry.get("busy").await.unwrap().status,
            JobStatus::Running
        );
    }

    #[tokio::test]
    async fn spawned_loop_stops_on_cancellation() {
        let registry = Arc::new(JobRegistry::new());
        let mut jobs = Config::default().jobs;
        jobs.job_cleanup_interval = 1;
        let sweeper = CleanupSweeper::from_config(registry, &jobs);

        let cancel = CancellationToken::new();
        let handle = sweeper.spawn(cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop promptly")
            .unwrap();
    }
}
