use crate::job::EvaluationResult;

use super::error::PipelineError;
use super::stages::{CvEvaluation, FinalAnalysis, ProjectEvaluation, Stage};

pub struct PipelineContext {
    // Input
    pub job_id: String,
    pub job_title: String,
    pub cv_text: String,
    pub project_text: String,

    // Set by Stage::CvEvaluation
    pub cv_evaluation: Option<CvEvaluation>,

    // Set by Stage::ProjectEvaluation
    pub project_evaluation: Option<ProjectEvaluation>,

    // Set by Stage::FinalAnalysis
    pub final_analysis: Option<FinalAnalysis>,
}

impl PipelineContext {
    pub fn new(
        job_id: impl Into<String>,
        job_title: impl Into<String>,
        cv_text: impl Into<String>,
        project_text: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            job_title: job_title.into(),
            cv_text: cv_text.into(),
            project_text: project_text.into(),
            cv_evaluation: None,
            project_evaluation: None,
            final_analysis: None,
        }
    }

    /// Folds the three stage outputs into the persisted result.
    pub fn to_result(&self) -> Result<EvaluationResult, PipelineError> {
        let cv = self
            .cv_evaluation
            .as_ref()
            .ok_or(PipelineError::Incomplete(Stage::CvEvaluation))?;
        let project = self
            .project_evaluation
            .as_ref()
            .ok_or(PipelineError::Incomplete(Stage::ProjectEvaluation))?;
        let analysis = self
            .final_analysis
            .as_ref()
            .ok_or(PipelineError::Incomplete(Stage::FinalAnalysis))?;

        Ok(EvaluationResult {
            cv_match_rate: cv.match_rate,
            cv_feedback: cv.feedback.clone(),
            project_score: project.score,
            project_feedback: project.feedback.clone(),
            overall_summary: analysis.overall_summary.clone(),
        })
    }
}
