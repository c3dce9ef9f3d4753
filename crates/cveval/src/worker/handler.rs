//! Executes one delivery: inputs, pipeline, terminal write.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::error::{ErrorKind, ProcessError};
use crate::files::FileRecord;
use crate::job::{EvaluationResult, JobState};
use crate::orchestrator::{JobOrchestrator, OrchestratorError};
use crate::pipeline::{EvaluationPipeline, PipelineContext, PipelineError, StageObserver};
use crate::processor::TextExtractor;
use crate::queue::{Delivery, Task};
use crate::sanitize::redact_path;
use crate::store::{FileStore, StoreError, UpdateOutcome};

/// Which input of a job a file plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Cv,
    ProjectReport,
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileRole::Cv => f.write_str("CV"),
            FileRole::ProjectReport => f.write_str("Project report"),
        }
    }
}

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{role} file not found: {id}")]
    FileNotFound { role: FileRole, id: String },

    #[error("Failed to extract text from {role} file {id}: {source}")]
    Extraction {
        role: FileRole,
        id: String,
        #[source]
        source: ProcessError,
    },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

impl HandlerError {
    /// Whether another delivery of the same task could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            HandlerError::FileNotFound { .. } => false,
            HandlerError::Extraction { source, .. } => {
                matches!(source, ProcessError::Interrupted(_))
            }
            HandlerError::Pipeline(PipelineError::Stage { .. }) => true,
            HandlerError::Pipeline(_) => false,
            HandlerError::Store(_) | HandlerError::Orchestrator(_) => true,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::FileNotFound { .. } => ErrorKind::NotFound,
            HandlerError::Extraction { source, .. } => source.kind(),
            HandlerError::Pipeline(e) => e.kind(),
            HandlerError::Store(e) => e.kind(),
            HandlerError::Orchestrator(e) => e.kind(),
        }
    }
}

/// How the queue should settle a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge as done.
    Completed,
    /// The job was already terminal; acknowledge without work.
    Duplicate,
    /// Report failure; the queue redelivers only when `retryable`.
    Failed { error: String, retryable: bool },
}

pub struct EvaluationHandler {
    orchestrator: JobOrchestrator,
    files: Arc<dyn FileStore>,
    extractor: Arc<dyn TextExtractor>,
    pipeline: Arc<EvaluationPipeline>,
    observer: Arc<dyn StageObserver>,
}

impl EvaluationHandler {
    pub fn new(
        orchestrator: JobOrchestrator,
        files: Arc<dyn FileStore>,
        extractor: Arc<dyn TextExtractor>,
        pipeline: Arc<EvaluationPipeline>,
        observer: Arc<dyn StageObserver>,
    ) -> Self {
        Self {
            orchestrator,
            files,
            extractor,
            pipeline,
            observer,
        }
    }

    pub async fn handle(&self, delivery: &Delivery) -> Disposition {
        let job_id = delivery.task.job_id.as_str();

        match self
            .orchestrator
            .update_job_status(job_id, JobState::Processing)
            .await
        {
            Ok(UpdateOutcome::Updated) => {}
            Ok(UpdateOutcome::TerminalGuarded) => {
                tracing::info!(job_id, task_id = %delivery.task_id, "Job already finished; skipping duplicate delivery");
                return Disposition::Duplicate;
            }
            Ok(UpdateOutcome::NotFound) => {
                tracing::error!(job_id, task_id = %delivery.task_id, "Task references a job that does not exist");
                return Disposition::Failed {
                    error: format!("Job not found: {}", job_id),
                    retryable: false,
                };
            }
            Err(e) => {
                return Disposition::Failed {
                    error: e.to_string(),
                    retryable: true,
                };
            }
        }

        let outcome = match self.evaluate(&delivery.task).await {
            Ok(result) => {
                self.orchestrator
                    .update_job_status(job_id, JobState::Completed(result))
                    .await
            }
            Err(e) => return self.settle_failure(delivery, e).await,
        };

        match outcome {
            Ok(UpdateOutcome::Updated) => {
                tracing::info!(job_id, attempt = delivery.attempt, "Evaluation completed");
                Disposition::Completed
            }
            Ok(UpdateOutcome::TerminalGuarded) => Disposition::Duplicate,
            Ok(UpdateOutcome::NotFound) => Disposition::Failed {
                error: format!("Job not found: {}", job_id),
                retryable: false,
            },
            Err(e) => self.settle_failure(delivery, e.into()).await,
        }
    }

    /// Writes `failed` when no redelivery will follow, otherwise returns the
    /// job to `queued` for the next attempt.
    async fn settle_failure(&self, delivery: &Delivery, error: HandlerError) -> Disposition {
        let job_id = delivery.task.job_id.as_str();
        let message = error.to_string();
        let retryable = error.is_retryable() && !delivery.is_last_attempt();

        let state = if retryable {
            tracing::warn!(job_id, attempt = delivery.attempt, max_attempts = delivery.max_attempts, error = %message, "Evaluation attempt failed; will retry");
            JobState::Queued
        } else {
            tracing::error!(job_id, attempt = delivery.attempt, kind = %error.kind(), error = %message, "Evaluation failed");
            JobState::Failed(message.clone())
        };

        self.record_failure(job_id, state).await;

        Disposition::Failed {
            error: message,
            retryable,
        }
    }

    /// Updates a job after a delivery failed outside [`handle`](Self::handle),
    /// such as a panic or an expired lease. The job goes back to `queued`
    /// when the queue will redeliver its task, otherwise it fails with
    /// `reason`.
    pub async fn release_job(&self, job_id: &str, reason: &str, redelivered: bool) {
        let state = if redelivered {
            tracing::warn!(job_id, reason, "Delivery lost; job requeued");
            JobState::Queued
        } else {
            tracing::error!(job_id, reason, "Delivery lost on final attempt; job failed");
            JobState::Failed(reason.to_string())
        };
        self.record_failure(job_id, state).await;
    }

    async fn record_failure(&self, job_id: &str, state: JobState) {
        if let Err(e) = self.orchestrator.update_job_status(job_id, state).await {
            tracing::error!(job_id, error = %e, "Could not record evaluation failure");
        }
    }

    async fn evaluate(&self, task: &Task) -> Result<EvaluationResult, HandlerError> {
        let cv_file = self.resolve(FileRole::Cv, &task.cv_id).await?;
        let project_file = self
            .resolve(FileRole::ProjectReport, &task.project_report_id)
            .await?;

        let cv_text = self.extract(FileRole::Cv, &cv_file).await?;
        let project_text = self.extract(FileRole::ProjectReport, &project_file).await?;

        let ctx = PipelineContext::new(&task.job_id, &task.job_title, cv_text, project_text);
        let (result, _ctx) = self.pipeline.run(ctx, self.observer.as_ref()).await;
        Ok(result?)
    }

    async fn resolve(&self, role: FileRole, id: &str) -> Result<FileRecord, HandlerError> {
        self.files
            .find_file(id)
            .await?
            .ok_or_else(|| HandlerError::FileNotFound {
                role,
                id: id.to_string(),
            })
    }

    async fn extract(&self, role: FileRole, file: &FileRecord) -> Result<String, HandlerError> {
        tracing::debug!(file_id = %file.id, path = %redact_path(&file.path), "Extracting text");
        self.extractor
            .extract_text(&file.path)
            .await
            .map_err(|source| HandlerError::Extraction {
                role,
                id: file.id.clone(),
                source,
            })
    }
}
