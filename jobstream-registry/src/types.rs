//! Core types for job tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured document carried by a message payload.
pub type Document = serde_json::Map<String, Value>;

/// Status of a tracked job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Duplicate,
}

impl JobStatus {
    /// Returns true if this status represents a terminal state.
    ///
    /// Only terminal records are eligible for eviction.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Duplicate)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Duplicate => "duplicate",
        })
    }
}

/// A record of one tracked job.
///
/// `job_id` never changes after creation and `completed_at` is set exactly
/// when the status becomes terminal. Duplicate arrivals are counted in
/// side-channel fields so they do not disturb the status state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub input: Document,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub duplicate_arrivals: u32,
    pub last_duplicate_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a new pending record.
    #[inline]
    pub fn new(job_id: impl Into<String>, input: Document) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            input,
            result: None,
            error: None,
            duplicate_arrivals: 0,
            last_duplicate_at: None,
        }
    }
}

/// Marker describing one duplicate arrival for an existing job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateMarker {
    pub job_id: String,
    pub observed_at: DateTime<Utc>,
    /// Status the existing record had when the duplicate arrived.
    pub existing_status: JobStatus,
    /// Total duplicate arrivals seen for this job so far.
    pub arrivals: u32,
}

/// Summary of one prune pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Terminal records removed because they aged past the retention cutoff.
    pub expired: usize,
    /// Terminal records removed to get back under the size bound.
    pub evicted: usize,
    /// Records left in the registry after the pass.
    pub remaining: usize,
    /// True when the registry is still over the bound because every
    /// remaining record is pending or running.
    pub over_capacity: bool,
}
