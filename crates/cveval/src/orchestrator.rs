//! Creation, lookup and status transitions of evaluation jobs.

use std::sync::Arc;

use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::job::{EvaluationRequest, Job, JobState, JobView};
use crate::queue::{QueueError, Task, TaskQueue};
use crate::store::{JobStore, StoreError, UpdateOutcome};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    /// The job row exists but its task never reached the queue.
    #[error("Failed to enqueue job {job_id}: {source}")]
    Enqueue {
        job_id: String,
        #[source]
        source: QueueError,
    },
}

/// Owns the job record lifecycle on behalf of the boundary layer and the
/// workers.
#[derive(Clone)]
pub struct JobOrchestrator {
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
}

impl JobOrchestrator {
    pub fn new(jobs: Arc<dyn JobStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self::with_clock(jobs, queue, Arc::new(SystemClock))
    }

    pub fn with_clock(
        jobs: Arc<dyn JobStore>,
        queue: Arc<dyn TaskQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { jobs, queue, clock }
    }

    /// Persists a `queued` job, then enqueues its task. Returns the job id.
    pub async fn create_evaluation_job(
        &self,
        request: EvaluationRequest,
    ) -> Result<String, OrchestratorError> {
        let job = Job::queued(&request, self.clock.now());
        self.jobs.insert_job(&job).await?;

        let task = Task::for_job(job.id.clone(), &request);
        self.queue
            .enqueue(&task)
            .await
            .map_err(|source| OrchestratorError::Enqueue {
                job_id: job.id.clone(),
                source,
            })?;

        tracing::info!(job_id = %job.id, job_title = %job.job_title, "Evaluation job queued");
        Ok(job.id)
    }

    /// Current view of a job, or `None` for an unknown id.
    pub async fn get_job_status(&self, job_id: &str) -> Result<Option<JobView>, OrchestratorError> {
        Ok(self.jobs.find_job(job_id).await?.map(|job| job.view()))
    }

    /// Writes a new state. Terminal jobs are left as they are.
    pub async fn update_job_status(
        &self,
        job_id: &str,
        state: JobState,
    ) -> Result<UpdateOutcome, OrchestratorError> {
        let status = state.status();
        let outcome = self
            .jobs
            .write_state(job_id, &state, self.clock.now())
            .await?;

        match outcome {
            UpdateOutcome::Updated => {
                tracing::debug!(job_id, %status, "Job status updated");
            }
            UpdateOutcome::TerminalGuarded => {
                tracing::warn!(job_id, %status, "Job already terminal; update ignored");
            }
            UpdateOutcome::NotFound => {
                tracing::warn!(job_id, %status, "Status update for unknown job");
            }
        }
        Ok(outcome)
    }
}
