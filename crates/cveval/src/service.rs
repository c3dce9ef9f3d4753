//! Composition root: builds the store, queue, AI client, pipeline and worker
//! pool from a [`Config`] and owns their lifecycle.

use std::path::PathBuf;
use std::sync::Arc;

use crate::ai::{AiClient, LlmBackend, OpenAiBackend};
use crate::clock::{Clock, SystemClock};
use crate::config::{validate_config, Config};
use crate::db::{default_database_path, Database};
use crate::error::{ConfigError, Error, Result};
use crate::files::FileRegistry;
use crate::job::{EvaluationRequest, JobView};
use crate::orchestrator::JobOrchestrator;
use crate::pipeline::{EvaluationPipeline, Evaluator, LoggingObserver, StageObserver};
use crate::processor::{DocumentExtractor, TextExtractor};
use crate::queue::{QueueCounts, SqliteQueue, TaskQueue};
use crate::sanitize::redact_path;
use crate::secrets::resolve_secret;
use crate::store::SqliteStore;
use crate::worker::{EvaluationHandler, WorkerPool};

/// Collaborators that callers may swap out. [`ServiceParts::new`] fills in
/// the production defaults for everything except the database and backend.
pub struct ServiceParts {
    pub database: Database,
    pub backend: Arc<dyn LlmBackend>,
    pub extractor: Arc<dyn TextExtractor>,
    pub observer: Arc<dyn StageObserver>,
    pub clock: Arc<dyn Clock>,
}

impl ServiceParts {
    pub fn new(database: Database, backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            database,
            backend,
            extractor: Arc::new(DocumentExtractor::new()),
            observer: Arc::new(LoggingObserver),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// A running evaluation service.
pub struct EvaluationService {
    orchestrator: JobOrchestrator,
    files: FileRegistry,
    queue: Arc<dyn TaskQueue>,
    pool: WorkerPool,
}

impl EvaluationService {
    /// Opens the configured database, resolves the API key and starts the
    /// workers. Must be called from within a tokio runtime.
    pub fn start(config: &Config) -> Result<Self> {
        validate_config(config)?;

        let db_path = match &config.database_path {
            Some(path) => PathBuf::from(path),
            None => default_database_path().ok_or_else(|| ConfigError::Validation {
                message: "database_path is not set and no home directory was found".to_string(),
            })?,
        };
        tracing::info!(path = %redact_path(&db_path), "Opening database");
        let database = Database::open(&db_path)?;

        let api_key = resolve_secret(
            config.ai.api_key.as_deref(),
            config.ai.api_key_file.as_deref(),
            config.ai.api_key_env.as_deref(),
        )?;
        let backend = OpenAiBackend::new(api_key, config.ai.request_timeout())?
            .with_base_url(config.ai.base_url.clone());

        Self::from_parts(config, ServiceParts::new(database, Arc::new(backend)))
    }

    /// Wires the service around caller-provided collaborators.
    pub fn from_parts(config: &Config, parts: ServiceParts) -> Result<Self> {
        validate_config(config)?;

        let store = Arc::new(SqliteStore::new(parts.database.clone()));
        let queue: Arc<dyn TaskQueue> = Arc::new(SqliteQueue::with_clock(
            parts.database,
            config.queue.to_settings(),
            Arc::clone(&parts.clock),
        ));

        let orchestrator =
            JobOrchestrator::with_clock(store.clone(), Arc::clone(&queue), parts.clock);

        let files = FileRegistry::new(
            store.clone(),
            config.uploads.upload_dir(),
            config.uploads.to_policy(),
        );
        files.ensure_upload_dir().map_err(|source| Error::UploadDir {
            path: files.upload_dir().to_path_buf(),
            source,
        })?;

        let ai = AiClient::new(parts.backend, config.ai.to_settings());
        let pipeline = Arc::new(EvaluationPipeline::new(Evaluator::new(ai)));
        let handler = Arc::new(EvaluationHandler::new(
            orchestrator.clone(),
            store,
            parts.extractor,
            pipeline,
            parts.observer,
        ));

        let pool = WorkerPool::start(Arc::clone(&queue), handler, config.worker.to_settings());

        tracing::info!(
            workers = pool.worker_count(),
            queue = %config.queue.name,
            model = %config.ai.model,
            "Evaluation service started"
        );

        Ok(Self {
            orchestrator,
            files,
            queue,
            pool,
        })
    }

    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.orchestrator
    }

    pub fn files(&self) -> &FileRegistry {
        &self.files
    }

    pub async fn create_evaluation_job(&self, request: EvaluationRequest) -> Result<String> {
        Ok(self.orchestrator.create_evaluation_job(request).await?)
    }

    pub async fn get_job_status(&self, job_id: &str) -> Result<Option<JobView>> {
        Ok(self.orchestrator.get_job_status(job_id).await?)
    }

    pub async fn queue_counts(&self) -> Result<QueueCounts> {
        Ok(self.queue.counts().await?)
    }

    /// Stops claiming work and waits for in-flight deliveries to settle.
    /// Tasks still waiting stay in the queue for the next start.
    pub async fn shutdown(self) {
        self.pool.shutdown();
        self.pool.wait().await;
        tracing::info!("Evaluation service stopped");
    }
}
