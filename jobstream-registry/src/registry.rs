//! The shared job map and its atomic operations.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::RegistryError;
use crate::types::{Document, DuplicateMarker, JobRecord, JobStatus, PruneReport};

/// Concurrency-safe registry of job records.
///
/// Cloning is cheap; all clones share the same underlying map. Every method
/// acquires the lock only for the duration of the map edit, so callers are
/// free to run handlers between calls without serializing other jobs.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, JobRecord>>>,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &"<RwLock<HashMap<String, JobRecord>>>")
            .finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically insert a pending record if the job id is unused.
    ///
    /// Returns false without any mutation when a record already exists.
    /// Presence check and insert happen under one write-lock acquisition,
    /// so concurrent creates for the same id cannot both succeed.
    pub async fn create(&self, job_id: &str, input: Document) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.entry(job_id.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(JobRecord::new(job_id, input));
                true
            }
        }
    }

    /// Move a job through the status state machine.
    ///
    /// Allowed edges are Pending->Running, Running->Completed and
    /// Running->Failed. Duplicate is never a valid target here; it is only
    /// reachable through [`mark_duplicate`](Self::mark_duplicate).
    /// `result` and `error` are applied only when given, and `completed_at`
    /// is stamped exactly when the new status is terminal.
    pub async fn transition(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<JobRecord, RegistryError> {
        let mut jobs = self.jobs.write().await;
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| RegistryError::JobNotFound(job_id.to_owned()))?;

        let allowed = matches!(
            (record.status, status),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        );
        if !allowed {
            return Err(RegistryError::InvalidTransition {
                job_id: job_id.to_owned(),
                from: record.status,
                to: status,
            });
        }

        record.status = status;
        if status.is_terminal() {
            record.completed_at = Some(Utc::now());
        }
        if result.is_some() {
            record.result = result;
        }
        if error.is_some() {
            record.error = error;
        }
        Ok(record.clone())
    }

    /// Record a duplicate arrival for an existing job.
    ///
    /// A record that is still Pending (registered but never dispatched) is
    /// moved to the terminal Duplicate status. In every other state only the
    /// side-channel marker fields change; status, result and error stay
    /// untouched.
    pub async fn mark_duplicate(&self, job_id: &str) -> Result<DuplicateMarker, RegistryError> {
        let mut jobs = self.jobs.write().await;
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| RegistryError::JobNotFound(job_id.to_owned()))?;

        let existing_status = record.status;
        let now = Utc::now();
        record.duplicate_arrivals += 1;
        record.last_duplicate_at = Some(now);
        if existing_status == JobStatus::Pending {
            record.status = JobStatus::Duplicate;
            record.completed_at = Some(now);
        }

        Ok(DuplicateMarker {
            job_id: job_id.to_owned(),
            observed_at: now,
            existing_status,
            arrivals: record.duplicate_arrivals,
        })
    }

    /// Reopen a terminal record for another processing attempt.
    ///
    /// The record moves back to Running with its `created_at` preserved;
    /// the previous outcome fields are cleared so the rerun's terminal
    /// transition fully replaces them. A Pending or Running record is
    /// refused, which keeps at most one in-flight attempt per job id.
    pub async fn begin_reprocess(&self, job_id: &str) -> Result<JobRecord, RegistryError> {
        let mut jobs = self.jobs.write().await;
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| RegistryError::JobNotFound(job_id.to_owned()))?;

        if !record.status.is_terminal() {
            return Err(RegistryError::InvalidTransition {
                job_id: job_id.to_owned(),
                from: record.status,
                to: JobStatus::Running,
            });
        }

        record.status = JobStatus::Running;
        record.completed_at = None;
        record.result = None;
        record.error = None;
        Ok(record.clone())
    }

    /// Get a snapshot of one record.
    pub async fn get(&self, job_id: &str) -> Option<JobRecord> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id).cloned()
    }

    /// Snapshot all records, optionally filtered by status.
    ///
    /// Returns clones rather than a live view so callers never observe the
    /// internal lock.
    pub async fn jobs_with_status(&self, status: Option<JobStatus>) -> Vec<JobRecord> {
        let jobs = self.jobs.read().await;
        jobs.values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect()
    }

    /// Number of records currently held.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Evict terminal records past the retention cutoff, then enforce the
    /// size bound by evicting the oldest terminal records first.
    ///
    /// Pending and Running records are never removed regardless of age, so
    /// the registry may stay over `max_jobs` when everything left is still
    /// in flight; the report flags that case instead.
    pub async fn prune(&self, cutoff: DateTime<Utc>, max_jobs: usize) -> PruneReport {
        let mut jobs = self.jobs.write().await;

        let expired: Vec<String> = jobs
            .values()
            .filter(|r| {
                r.status.is_terminal() && r.completed_at.map_or(false, |done| done < cutoff)
            })
            .map(|r| r.job_id.clone())
            .collect();
        for job_id in &expired {
            jobs.remove(job_id);
        }

        let mut evicted = 0;
        if jobs.len() > max_jobs {
            let mut terminal: Vec<(String, DateTime<Utc>)> = jobs
                .values()
                .filter(|r| r.status.is_terminal())
                .map(|r| (r.job_id.clone(), r.completed_at.unwrap_or(r.created_at)))
                .collect();
            terminal.sort_by_key(|(_, done)| *done);

            let excess = jobs.len() - max_jobs;
            for (job_id, _) in terminal.into_iter().take(excess) {
                jobs.remove(&job_id);
                evicted += 1;
            }
        }

        let remaining = jobs.len();
        let report = PruneReport {
            expired: expired.len(),
            evicted,
            remaining,
            over_capacity: remaining > max_jobs,
        };
        debug!(
            expired = report.expired,
            evicted = report.evicted,
            remaining = report.remaining,
            "pruned job registry"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(key: &str, value: &str) -> Document {
        let mut d = Document::new();
        d.insert(key.to_owned(), json!(value));
        d
    }

    #[tokio::test]
    async fn create_inserts_pending_record() {
        let registry = JobRegistry::new();
        assert!(registry.create("j1", doc("k", "v")).await);

        let record = registry.get("j1").await.unwrap();
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.input.get("k"), Some(&json!("v")));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn create_refuses_existing_id_without_mutation() {
        let registry = JobRegistry::new();
        assert!(registry.create("j1", doc("run", "first")).await);
        assert!(!registry.create("j1", doc("run", "second")).await);

        let record = registry.get("j1").await.unwrap();
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.input.get("run"), Some(&json!("first")));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn transition_happy_path_sets_completed_at() {
        let registry = JobRegistry::new();
        registry.create("j1", Document::new()).await;

        let running = registry
            .transition("j1", JobStatus::Running, None, None)
            .await
            .unwrap();
        assert!(running.completed_at.is_none());

        let done = registry
            .transition("j1", JobStatus::Completed, Some(json!({"ok": true})), None)
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.completed_at.is_some());
        assert_eq!(done.result, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn transition_rejects_invalid_edges() {
        let registry = JobRegistry::new();
        registry.create("j1", Document::new()).await;

        // Pending may only move to Running.
        let err = registry
            .transition("j1", JobStatus::Completed, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));

        // Duplicate is never a transition target.
        let err = registry
            .transition("j1", JobStatus::Duplicate, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));

        registry
            .transition("j1", JobStatus::Running, None, None)
            .await
            .unwrap();
        registry
            .transition("j1", JobStatus::Failed, None, Some("boom".into()))
            .await
            .unwrap();

        // Terminal records stay terminal under ordinary transitions.
        let err = registry
            .transition("j1", JobStatus::Running, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn transition_unknown_job_is_not_found() {
        let registry = JobRegistry::new();
        let err = registry
            .transition("ghost", JobStatus::Running, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::JobNotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn mark_duplicate_on_pending_record_is_terminal() {
        let registry = JobRegistry::new();
        registry.create("j1", Document::new()).await;

        let marker = registry.mark_duplicate("j1").await.unwrap();
        assert_eq!(marker.existing_status, JobStatus::Pending);
        assert_eq!(marker.arrivals, 1);

        let record = registry.get("j1").await.unwrap();
        assert_eq!(record.status, JobStatus::Duplicate);
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn mark_duplicate_leaves_settled_record_untouched() {
        let registry = JobRegistry::new();
        registry.create("j1", Document::new()).await;
        registry
            .transition("j1", JobStatus::Running, None, None)
            .await
            .unwrap();
        registry
            .transition("j1", JobStatus::Completed, Some(json!(42)), None)
            .await
            .unwrap();
        let before = registry.get("j1").await.unwrap();

        let marker = registry.mark_duplicate("j1").await.unwrap();
        assert_eq!(marker.existing_status, JobStatus::Completed);

        let after = registry.get("j1").await.unwrap();
        assert_eq!(after.status, JobStatus::Completed);
        assert_eq!(after.result, before.result);
        assert_eq!(after.completed_at, before.completed_at);
        assert_eq!(after.duplicate_arrivals, 1);
        assert!(after.last_duplicate_at.is_some());
    }

    #[tokio::test]
    async fn begin_reprocess_preserves_created_at_and_clears_outcome() {
        let registry = JobRegistry::new();
        registry.create("j1", Document::new()).await;
        registry
            .transition("j1", JobStatus::Running, None, None)
            .await
            .unwrap();
        registry
            .transition("j1", JobStatus::Failed, None, Some("first run".into()))
            .await
            .unwrap();
        let first = registry.get("j1").await.unwrap();

        let reopened = registry.begin_reprocess("j1").await.unwrap();
        assert_eq!(reopened.status, JobStatus::Running);
        assert_eq!(reopened.created_at, first.created_at);
        assert!(reopened.completed_at.is_none());
        assert!(reopened.result.is_none());
        assert!(reopened.error.is_none());
    }

    #[tokio::test]
    async fn begin_reprocess_refuses_in_flight_jobs() {
        let registry = JobRegistry::new();
        registry.create("j1", Document::new()).await;

        let err = registry.begin_reprocess("j1").await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));

        registry
            .transition("j1", JobStatus::Running, None, None)
            .await
            .unwrap();
        let err = registry.begin_reprocess("j1").await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn jobs_with_status_returns_snapshot() {
        let registry = JobRegistry::new();
        registry.create("a", Document::new()).await;
        registry.create("b", Document::new()).await;
        registry
            .transition("b", JobStatus::Running, None, None)
            .await
            .unwrap();

        let pending = registry.jobs_with_status(Some(JobStatus::Pending)).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].job_id, "a");

        let all = registry.jobs_with_status(None).await;
        assert_eq!(all.len(), 2);
    }

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
    async fn prune_removes_expired_terminal_records() {
        let registry = JobRegistry::new();
        settle(&registry, "old").await;
        let done = registry.get("old").await.unwrap().completed_at.unwrap();

        registry.create("live", Document::new()).await;

        let report = registry
            .prune(done + chrono::Duration::milliseconds(1), 100)
            .await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.evicted, 0);
        assert_eq!(report.remaining, 1);
        assert!(registry.get("old").await.is_none());
        assert!(registry.get("live").await.is_some());
    }

    #[tokio::test]
    async fn prune_is_idempotent_at_fixed_cutoff() {
        let registry = JobRegistry::new();
        settle(&registry, "a").await;
        settle(&registry, "b").await;
        let cutoff = Utc::now() + chrono::Duration::milliseconds(1);

        let first = registry.prune(cutoff, 100).await;
        assert_eq!(first.expired, 2);

        let second = registry.prune(cutoff, 100).await;
        assert_eq!(second.expired, 0);
        assert_eq!(second.evicted, 0);
    }

    #[tokio::test]
    async fn prune_evicts_oldest_terminal_first_under_capacity_pressure() {
        let registry = JobRegistry::new();
        settle(&registry, "first").await;
        settle(&registry, "second").await;
        settle(&registry, "third").await;

        // Cutoff in the past: nothing has expired, so only the size bound
        // applies and the oldest completion goes first.
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let report = registry.prune(cutoff, 2).await;
        assert_eq!(report.expired, 0);
        assert_eq!(report.evicted, 1);
        assert_eq!(report.remaining, 2);
        assert!(!report.over_capacity);
        assert!(registry.get("first").await.is_none());
        assert!(registry.get("second").await.is_some());
        assert!(registry.get("third").await.is_some());
    }

    #[tokio::test]
    async fn prune_never_evicts_pending_or_running_records() {
        let registry = JobRegistry::new();
        registry.create("running", Document::new()).await;
        registry
            .transition("running", JobStatus::Running, None, None)
            .await
            .unwrap();
        registry.create("pending", Document::new()).await;

        // max_jobs=1 with one running job: the second job must not displace
        // it, and neither record may be silently dropped.
        let report = registry.prune(Utc::now(), 1).await;
        assert_eq!(report.expired, 0);
        assert_eq!(report.evicted, 0);
        assert_eq!(report.remaining, 2);
        assert!(report.over_capacity);
        assert_eq!(
            registry.get("running").await.unwrap().status,
            JobStatus::Running
        );
        assert!(registry.get("pending").await.is_some());
    }

    #[tokio::test]
    async fn concurrent_creates_for_same_id_yield_one_record() {
        let registry = JobRegistry::new();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.create("contested", Document::new()).await
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(registry.len().await, 1);
    }
}
