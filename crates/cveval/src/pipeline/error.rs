use thiserror::Error;

use super::stages::Stage;
use crate::ai::AiError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: AiError,
    },

    #[error("Pipeline finished without running {0}")]
    Incomplete(Stage),

    #[error("Could not render {stage} input: {source}")]
    Render {
        stage: Stage,
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Stage { stage, .. } | PipelineError::Render { stage, .. } => *stage,
            PipelineError::Incomplete(stage) => *stage,
        }
    }
}
