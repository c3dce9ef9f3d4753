use tracing::{info_span, Instrument};

use crate::ai::AiClient;
use crate::job::EvaluationResult;

use super::context::PipelineContext;
use super::error::PipelineError;
use super::progress::StageObserver;
use super::prompts;
use super::stages::{check_range, CvEvaluation, FinalAnalysis, ProjectEvaluation, Stage};

/// The three model calls of an evaluation.
#[derive(Clone)]
pub struct Evaluator {
    ai: AiClient,
}

impl Evaluator {
    pub fn new(ai: AiClient) -> Self {
        Self { ai }
    }

    pub async fn evaluate_cv(
        &self,
        cv_text: &str,
        job_title: &str,
    ) -> Result<CvEvaluation, PipelineError> {
        let stage = Stage::CvEvaluation;
        let prompt = prompts::cv_evaluation_prompt(prompts::job_description(job_title), cv_text);
        let eval: CvEvaluation = self
            .ai
            .call_structured(&prompt)
            .await
            .map_err(|source| PipelineError::Stage { stage, source })?;

        check_range(stage, "match_rate", eval.match_rate, 0.0, 1.0);
        Ok(eval)
    }

    pub async fn evaluate_project(
        &self,
        project_text: &str,
        job_title: &str,
    ) -> Result<ProjectEvaluation, PipelineError> {
        let stage = Stage::ProjectEvaluation;
        let prompt =
            prompts::project_evaluation_prompt(prompts::project_brief(job_title), project_text);
        let eval: ProjectEvaluation = self
            .ai
            .call_structured(&prompt)
            .await
            .map_err(|source| PipelineError::Stage { stage, source })?;

        check_range(stage, "score", eval.score, 1.0, 5.0);
        Ok(eval)
    }

    pub async fn generate_final_analysis(
        &self,
        cv_eval: &CvEvaluation,
        project_eval: &ProjectEvaluation,
        job_title: &str,
    ) -> Result<FinalAnalysis, PipelineError> {
        let stage = Stage::FinalAnalysis;
        let render = |source| PipelineError::Render { stage, source };
        let prompt = prompts::final_analysis_prompt(
            &serde_json::to_string_pretty(cv_eval).map_err(render)?,
            &serde_json::to_string_pretty(project_eval).map_err(render)?,
            job_title,
        );
        let analysis: FinalAnalysis = self
            .ai
            .call_structured(&prompt)
            .await
            .map_err(|source| PipelineError::Stage { stage, source })?;

        check_range(stage, "fit_score", analysis.fit_score, 0.0, 1.0);
        Ok(analysis)
    }
}

/// Runs the stages of one job strictly in order.
pub struct EvaluationPipeline {
    evaluator: Evaluator,
    stages: Vec<Stage>,
}

impl EvaluationPipeline {
    pub fn new(evaluator: Evaluator) -> Self {
        Self {
            evaluator,
            stages: Stage::ALL.to_vec(),
        }
    }

    /// Runs every stage and assembles the result. Returns the context as
    /// well so callers can inspect partial outputs after a failure.
    pub async fn run(
        &self,
        mut ctx: PipelineContext,
        observer: &dyn StageObserver,
    ) -> (Result<EvaluationResult, PipelineError>, PipelineContext) {
        let span = info_span!("pipeline", job_id = %ctx.job_id, job_title = %ctx.job_title);

        let outcome = async {
            for &stage in &self.stages {
                observer.stage_started(&ctx.job_id, stage).await;

                let step = self
                    .run_stage(stage, &mut ctx)
                    .instrument(info_span!("stage", name = stage.name()))
                    .await;
                if let Err(e) = step {
                    observer
                        .stage_failed(&ctx.job_id, stage, &e.to_string())
                        .await;
                    return Err(e);
                }

                observer.stage_completed(&ctx, stage).await;
            }
            ctx.to_result()
        }
        .instrument(span)
        .await;

        (outcome, ctx)
    }

    async fn run_stage(&self, stage: Stage, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        match stage {
            Stage::CvEvaluation => {
                let eval = self
                    .evaluator
                    .evaluate_cv(&ctx.cv_text, &ctx.job_title)
                    .await?;
                ctx.cv_evaluation = Some(eval);
            }
            Stage::ProjectEvaluation => {
                let eval = self
                    .evaluator
                    .evaluate_project(&ctx.project_text, &ctx.job_title)
                    .await?;
                ctx.project_evaluation = Some(eval);
            }
            Stage::FinalAnalysis => {
                let cv = ctx
                    .cv_evaluation
                    .as_ref()
                    .ok_or(PipelineError::Incomplete(Stage::CvEvaluation))?;
                let project = ctx
                    .project_evaluation
                    .as_ref()
                    .ok_or(PipelineError::Incomplete(Stage::ProjectEvaluation))?;
                let analysis = self
                    .evaluator
                    .generate_final_analysis(cv, project, &ctx.job_title)
                    .await?;
                ctx.final_analysis = Some(analysis);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiError, AiSettings, CompletionRequest, LlmBackend, LlmError};
    use crate::pipeline::NoopObserver;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replies in order and records every prompt it receives.
    struct ByPrompt {
        replies: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ByPrompt {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmBackend for ByPrompt {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(request.user_prompt.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(LlmError::EmptyResponse)
        }
    }

    const CV: &str = r#"{"match_rate": 0.8, "feedback": "Strong backend", "strengths": ["APIs"], "weaknesses": []}"#;
    const PROJECT: &str = r#"Sure! {"score": 4.5, "feedback": "Well built", "technical_quality": 4, "implementation_quality": 5, "documentation_quality": 4}"#;
    const FINAL: &str = r#"{"overall_summary": "Recommended", "recommendation": "Advance", "fit_score": 0.85}"#;

    fn pipeline(backend: Arc<ByPrompt>) -> EvaluationPipeline {
        EvaluationPipeline::new(Evaluator::new(AiClient::new(backend, AiSettings::default())))
    }

    #[tokio::test]
    async fn test_runs_all_stages_in_order() {
        let backend = ByPrompt::new(&[CV, PROJECT, FINAL]);
        let ctx = PipelineContext::new("job-1", "Backend Engineer", "cv text", "report text");

        let (result, ctx) = pipeline(backend.clone()).run(ctx, &NoopObserver).await;
        let result = result.unwrap();
        assert_eq!(result.cv_match_rate, 0.8);
        assert_eq!(result.project_score, 4.5);
        assert_eq!(result.overall_summary, "Recommended");
        assert_eq!(ctx.final_analysis.unwrap().fit_score, 0.85);

        let prompts = backend.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[0].contains("cv text"));
        assert!(prompts[0].contains("Position: Backend Engineer"));
        assert!(prompts[1].contains("report text"));
        assert!(prompts[2].contains("\"match_rate\": 0.8"));
        assert!(prompts[2].contains("POSITION APPLIED FOR: Backend Engineer"));
    }

    #[tokio::test]
    async fn test_unknown_title_uses_backend_reference() {
        let backend = ByPrompt::new(&[CV, PROJECT, FINAL]);
        let ctx = PipelineContext::new("job-1", "Chief Vibes Officer", "cv", "report");
        let (result, _) = pipeline(backend.clone()).run(ctx, &NoopObserver).await;
        assert!(result.is_ok());

        let prompts = backend.prompts.lock().unwrap();
        assert!(prompts[0].contains("Position: Backend Engineer"));
        assert!(prompts[1].contains("CASE STUDY BRIEF - Backend Engineer"));
    }

    #[tokio::test]
    async fn test_out_of_range_scores_pass_through() {
        let backend = ByPrompt::new(&[
            r#"{"match_rate": 1.7, "feedback": "too generous"}"#,
            r#"{"score": 0.2, "feedback": "too harsh", "technical_quality": 0, "implementation_quality": 6, "documentation_quality": 1}"#,
            r#"{"overall_summary": "odd", "recommendation": "Reject", "fit_score": -1}"#,
        ]);
        let ctx = PipelineContext::new("job-1", "Backend Engineer", "cv", "report");
        let (result, _) = pipeline(backend).run(ctx, &NoopObserver).await;
        let result = result.unwrap();
        assert_eq!(result.cv_match_rate, 1.7);
        assert_eq!(result.project_score, 0.2);
    }

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StageObserver for Recording {
        async fn stage_started(&self, _job_id: &str, stage: Stage) {
            self.events.lock().unwrap().push(format!("start:{}", stage));
        }
        async fn stage_completed(&self, _ctx: &PipelineContext, stage: Stage) {
            self.events.lock().unwrap().push(format!("done:{}", stage));
        }
        async fn stage_failed(&self, _job_id: &str, stage: Stage, _error: &str) {
            self.events.lock().unwrap().push(format!("fail:{}", stage));
        }
    }

    #[tokio::test]
    async fn test_failure_stops_pipeline_and_keeps_partial_output() {
        let backend = ByPrompt::new(&[CV, "no json at all", FINAL]);
        let observer = Recording::default();
        let ctx = PipelineContext::new("job-1", "Backend Engineer", "cv", "report");

        let (result, ctx) = pipeline(backend.clone()).run(ctx, &observer).await;
        let err = result.unwrap_err();
        assert_eq!(err.stage(), Stage::ProjectEvaluation);
        assert!(matches!(
            err,
            PipelineError::Stage {
                source: AiError::NoJsonFound,
                ..
            }
        ));
        assert!(ctx.cv_evaluation.is_some());
        assert!(ctx.final_analysis.is_none());
        assert_eq!(backend.prompts.lock().unwrap().len(), 2);

        assert_eq!(
            *observer.events.lock().unwrap(),
            [
                "start:cv_evaluation",
                "done:cv_evaluation",
                "start:project_evaluation",
                "fail:project_evaluation"
            ]
        );
    }

    #[tokio::test]
    async fn test_final_analysis_without_fit_score_fails_stage() {
        let backend = ByPrompt::new(&[
            CV,
            PROJECT,
            r#"{"overall_summary": "Recommended", "recommendation": "Advance"}"#,
        ]);
        let ctx = PipelineContext::new("job-1", "Backend Engineer", "cv", "report");

        let (result, ctx) = pipeline(backend).run(ctx, &NoopObserver).await;
        let err = result.unwrap_err();
        assert_eq!(err.stage(), Stage::FinalAnalysis);
        assert!(matches!(
            err,
            PipelineError::Stage {
                source: AiError::InvalidJson(_),
                ..
            }
        ));
        assert!(ctx.project_evaluation.is_some());
        assert!(ctx.final_analysis.is_none());
    }
}
