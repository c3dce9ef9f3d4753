//! Stage identifiers and stage outputs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One step of the evaluation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    CvEvaluation,
    ProjectEvaluation,
    FinalAnalysis,
}

impl Stage {
    /// Execution order. Later stages read the outputs of earlier ones.
    pub const ALL: [Stage; 3] = [
        Stage::CvEvaluation,
        Stage::ProjectEvaluation,
        Stage::FinalAnalysis,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::CvEvaluation => "cv_evaluation",
            Stage::ProjectEvaluation => "project_evaluation",
            Stage::FinalAnalysis => "final_analysis",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Model verdict on a CV. `match_rate` is expected in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvEvaluation {
    pub match_rate: f64,
    pub feedback: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
}

/// Model verdict on a project report. Scores are expected in `[1, 5]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEvaluation {
    pub score: f64,
    pub feedback: String,
    pub technical_quality: f64,
    pub implementation_quality: f64,
    pub documentation_quality: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnalysis {
    pub overall_summary: String,
    pub recommendation: String,
    /// Expected in `[0, 1]`.
    pub fit_score: f64,
}

/// Logs scores the model put outside their documented range. Values are
/// never adjusted.
pub(crate) fn check_range(stage: Stage, field: &str, value: f64, min: f64, max: f64) {
    if !(min..=max).contains(&value) {
        tracing::warn!(stage = %stage, field, value, min, max, "Model returned out-of-range score");
    }
}
