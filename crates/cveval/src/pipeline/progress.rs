use async_trait::async_trait;

use super::context::PipelineContext;
use super::stages::Stage;

/// Per-stage hook. Called strictly in stage order.
#[async_trait]
pub trait StageObserver: Send + Sync {
    async fn stage_started(&self, _job_id: &str, _stage: Stage) {}

    /// `ctx` already holds the output of `stage`.
    async fn stage_completed(&self, _ctx: &PipelineContext, _stage: Stage) {}

    async fn stage_failed(&self, _job_id: &str, _stage: Stage, _error: &str) {}
}

/// No-op observer for unit tests.
pub struct NoopObserver;

#[async_trait]
impl StageObserver for NoopObserver {}

/// Logs stage transitions.
pub struct LoggingObserver;

#[async_trait]
impl StageObserver for LoggingObserver {
    async fn stage_started(&self, job_id: &str, stage: Stage) {
        tracing::info!(job_id, stage = %stage, "Stage started");
    }

    async fn stage_completed(&self, ctx: &PipelineContext, stage: Stage) {
        tracing::info!(job_id = %ctx.job_id, stage = %stage, "Stage completed");
    }

    async fn stage_failed(&self, job_id: &str, stage: Stage, error: &str) {
        tracing::warn!(job_id, stage = %stage, error, "Stage failed");
    }
}
