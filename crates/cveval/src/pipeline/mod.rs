//! Evaluation pipeline: CV evaluation, project evaluation, final analysis.

pub mod context;
pub mod error;
pub mod progress;
pub mod prompts;
pub mod runner;
pub mod stages;

pub use context::PipelineContext;
pub use error::PipelineError;
pub use progress::{LoggingObserver, NoopObserver, StageObserver};
pub use runner::{EvaluationPipeline, Evaluator};
pub use stages::{CvEvaluation, FinalAnalysis, ProjectEvaluation, Stage};
