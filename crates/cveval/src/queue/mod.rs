//! Work queue between the orchestrator and the worker pool.
//!
//! Delivery is at-least-once. A claimed task is held under a lease; when the
//! worker fails it (or the lease runs out) the task is redelivered after an
//! exponential backoff until its attempts are used up, after which it stays
//! in the dead `failed` state.

mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DatabaseError;
use crate::job::EvaluationRequest;

pub use sqlite::SqliteQueue;

pub const DEFAULT_QUEUE_NAME: &str = "evaluation";

/// Failure reason recorded when a lease runs out before acknowledgement.
pub const LEASE_EXPIRED: &str = "lease expired before the worker acknowledged the task";

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to encode task for job {job_id}: {source}")]
    Encode {
        job_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Snapshot of a job's inputs taken at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub job_id: String,
    pub job_title: String,
    pub cv_id: String,
    pub project_report_id: String,
}

impl Task {
    pub fn for_job(job_id: impl Into<String>, request: &EvaluationRequest) -> Self {
        Self {
            job_id: job_id.into(),
            job_title: request.job_title.clone(),
            cv_id: request.cv_id.clone(),
            project_report_id: request.project_report_id.clone(),
        }
    }
}

/// A task claimed by one worker. The lease token identifies this delivery;
/// acknowledgements carrying an older token are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub task_id: String,
    pub task: Task,
    /// 1-based attempt number of this delivery.
    pub attempt: u32,
    pub max_attempts: u32,
    pub worker_id: String,
    pub lease_token: String,
    pub lease_expires_at: DateTime<Utc>,
}

impl Delivery {
    /// No redelivery follows a failure of this attempt.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// What happened to a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Scheduled for redelivery at the given time.
    Retrying { available_at: DateTime<Utc> },
    /// Attempts exhausted or failure not retryable.
    Dead,
    /// The lease had already been superseded; nothing changed.
    Stale,
}

/// A delivery whose lease ran out, and what the queue did with its task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredLease {
    pub task_id: String,
    pub job_id: String,
    pub attempt: u32,
    /// `Retrying` or `Dead`.
    pub outcome: FailOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    pub name: String,
    pub max_attempts: u32,
    /// Delay before the first redelivery; doubles with every attempt.
    pub backoff_base: Duration,
    pub lease_timeout: Duration,
    pub keep_completed: u32,
    pub keep_failed: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_QUEUE_NAME.to_string(),
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
            lease_timeout: Duration::from_secs(300),
            keep_completed: 100,
            keep_failed: 50,
        }
    }
}

impl QueueSettings {
    /// Delay before redelivering a task whose `attempt`-th delivery failed.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exp)
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Durably stores a task and returns its id.
    async fn enqueue(&self, task: &Task) -> Result<String, QueueError>;

    /// Claims the next due task for `worker_id`, if any.
    async fn claim(&self, worker_id: &str) -> Result<Option<Delivery>, QueueError>;

    /// Treats every expired lease as a failed attempt and returns the tasks
    /// it touched, so their jobs can be updated.
    async fn reap_expired(&self) -> Result<Vec<ExpiredLease>, QueueError>;

    /// Renews the lease of a delivery still being worked on. Returns false
    /// when the lease was already lost.
    async fn extend_lease(&self, delivery: &Delivery) -> Result<bool, QueueError>;

    /// Acknowledges success. Returns false when the lease was stale.
    async fn complete(&self, delivery: &Delivery) -> Result<bool, QueueError>;

    async fn fail(
        &self,
        delivery: &Delivery,
        error: &str,
        retryable: bool,
    ) -> Result<FailOutcome, QueueError>;

    async fn counts(&self) -> Result<QueueCounts, QueueError>;

    /// Waits until new work is enqueued or `timeout` elapses. Returns true
    /// when woken by an enqueue.
    async fn wait_for_work(&self, timeout: Duration) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let settings = QueueSettings::default();
        assert_eq!(settings.backoff_after(1), Duration::from_secs(2));
        assert_eq!(settings.backoff_after(2), Duration::from_secs(4));
        assert_eq!(settings.backoff_after(3), Duration::from_secs(8));
    }

    #[test]
    fn test_last_attempt() {
        let mut delivery = Delivery {
            task_id: "t".into(),
            task: Task::for_job("j", &EvaluationRequest::new("Backend Engineer", "a", "b")),
            attempt: 2,
            max_attempts: 3,
            worker_id: "w".into(),
            lease_token: "l".into(),
            lease_expires_at: Utc::now(),
        };
        assert!(!delivery.is_last_attempt());
        delivery.attempt = 3;
        assert!(delivery.is_last_attempt());
    }

    #[test]
    fn test_task_payload_shape() {
        let task = Task::for_job("job-1", &EvaluationRequest::new("Backend Engineer", "cv", "pr"));
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["projectReportId"], "pr");
    }
}
