pub mod ai;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod files;
pub mod job;
pub mod orchestrator;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod sanitize;
pub mod secrets;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use ai::{AiClient, AiError, AiSettings, LlmBackend, LlmError, OpenAiBackend};
pub use config::{load_config, load_config_from_str, Config};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, Error, ErrorKind, ProcessError, Result};
pub use files::{FileRecord, FileRegistry, NewFile, UploadError, UploadPolicy};
pub use job::{EvaluationRequest, EvaluationResult, JobState, JobStatus, JobView};
pub use orchestrator::{JobOrchestrator, OrchestratorError};
pub use pipeline::{EvaluationPipeline, PipelineContext, PipelineError, Stage, StageObserver};
pub use queue::{QueueSettings, SqliteQueue, TaskQueue};
pub use secrets::{resolve_secret, SecretError};
pub use service::{EvaluationService, ServiceParts};
pub use store::{FileStore, JobStore, SqliteStore, UpdateOutcome};
pub use worker::{EvaluationHandler, WorkerPool, WorkerSettings};
