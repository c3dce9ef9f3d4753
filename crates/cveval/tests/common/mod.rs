//! Shared utilities for cveval integration tests.
//!
//! - `StageBackend`: scripted LLM backend answering each pipeline stage
//! - `TestHarness`: temp upload directory, in-memory database and a config
//!   tuned for fast retries

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use cveval::ai::{CompletionRequest, LlmBackend, LlmError};
use cveval::config::Config;
use cveval::files::{FileRecord, FileRegistry, NewFile, UploadPolicy};
use cveval::job::{EvaluationRequest, JobStatus, JobView};
use cveval::orchestrator::JobOrchestrator;
use cveval::pipeline::NoopObserver;
use cveval::queue::{QueueSettings, SqliteQueue};
use cveval::service::{EvaluationService, ServiceParts};
use cveval::store::SqliteStore;
use cveval::Database;

pub const CV_RESPONSE: &str = r#"{"match_rate": 0.82, "feedback": "Solid backend experience with Rust and PostgreSQL", "strengths": ["APIs"], "weaknesses": ["No Kubernetes"]}"#;
pub const PROJECT_RESPONSE: &str = r#"Here is the evaluation:
{"score": 4.1, "feedback": "Clean service design with tests", "technical_quality": 4.0, "implementation_quality": 4.2, "documentation_quality": 3.9}"#;
pub const FINAL_RESPONSE: &str = r#"{"overall_summary": "Strong candidate for the backend role", "recommendation": "Advance to interview", "fit_score": 0.8}"#;

/// Which stage a prompt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Cv,
    Project,
    Final,
}

fn classify(prompt: &str) -> PromptKind {
    if prompt.contains("evaluating a candidate's CV") {
        PromptKind::Cv
    } else if prompt.contains("evaluating a candidate's project report") {
        PromptKind::Project
    } else {
        PromptKind::Final
    }
}

/// Answers every stage with a fixed response, after an optional number of
/// transport failures or panics and behind an optional gate.
pub struct StageBackend {
    cv: String,
    project: String,
    final_analysis: String,
    failures_left: AtomicU32,
    panics_left: AtomicU32,
    gate: Option<Arc<Semaphore>>,
    calls: Mutex<Vec<PromptKind>>,
}

impl StageBackend {
    pub fn new() -> Self {
        Self {
            cv: CV_RESPONSE.to_string(),
            project: PROJECT_RESPONSE.to_string(),
            final_analysis: FINAL_RESPONSE.to_string(),
            failures_left: AtomicU32::new(0),
            panics_left: AtomicU32::new(0),
            gate: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fails the next `n` calls with a 503.
    pub fn failing_first(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn always_failing(self) -> Self {
        self.failing_first(u32::MAX)
    }

    /// Panics on the next `n` calls. Panicking calls are not recorded.
    pub fn panicking_first(self, n: u32) -> Self {
        self.panics_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn always_panicking(self) -> Self {
        self.panicking_first(u32::MAX)
    }

    pub fn with_responses(mut self, cv: &str, project: &str, final_analysis: &str) -> Self {
        self.cv = cv.to_string();
        self.project = project.to_string();
        self.final_analysis = final_analysis.to_string();
        self
    }

    /// Every call waits for a permit on `gate`.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<PromptKind> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmBackend for StageBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        let panicking = self
            .panics_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if panicking {
            panic!("backend blew up");
        }

        let kind = classify(&request.user_prompt);
        self.calls.lock().unwrap().push(kind);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LlmError::Status {
                status: 503,
                body: "upstream overloaded".to_string(),
            });
        }

        Ok(match kind {
            PromptKind::Cv => self.cv.clone(),
            PromptKind::Project => self.project.clone(),
            PromptKind::Final => self.final_analysis.clone(),
        })
    }
}

/// Isolated environment for one test.
pub struct TestHarness {
    temp_dir: TempDir,
    pub upload_dir: PathBuf,
    pub database: Database,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let upload_dir = temp_dir.path().join("uploads");
        std::fs::create_dir_all(&upload_dir).expect("Failed to create upload dir");

        Self {
            temp_dir,
            upload_dir,
            database: Database::open_in_memory().expect("Failed to open database"),
        }
    }

    /// Fast timings: millisecond backoffs and polling.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.worker.worker_count = 2;
        config.worker.poll_interval_ms = 10;
        config.queue.backoff_base_ms = 20;
        config.ai.backoff_unit_ms = 1;
        config.uploads.upload_dir = self.upload_dir.to_string_lossy().into_owned();
        config
    }

    pub fn start(&self, backend: Arc<StageBackend>) -> EvaluationService {
        self.start_with(&self.config(), backend)
    }

    pub fn start_with(&self, config: &Config, backend: Arc<StageBackend>) -> EvaluationService {
        let parts = ServiceParts::new(self.database.clone(), backend)
            .with_observer(Arc::new(NoopObserver));
        EvaluationService::from_parts(config, parts).expect("Failed to start service")
    }

    /// An orchestrator on the same database with no workers attached.
    pub fn orchestrator(&self) -> JobOrchestrator {
        JobOrchestrator::new(
            Arc::new(SqliteStore::new(self.database.clone())),
            Arc::new(SqliteQueue::new(
                self.database.clone(),
                QueueSettings::default(),
            )),
        )
    }

    pub fn registry(&self) -> FileRegistry {
        FileRegistry::new(
            Arc::new(SqliteStore::new(self.database.clone())),
            self.upload_dir.clone(),
            UploadPolicy::default(),
        )
    }

    /// Writes `content` into the upload directory and registers it.
    pub async fn upload_text(&self, filename: &str, content: &str) -> FileRecord {
        let registry = self.registry();
        let path = registry.storage_path(filename);
        std::fs::write(&path, content).expect("Failed to write upload");

        registry
            .register(NewFile {
                filename: filename.to_string(),
                path,
                mimetype: Some("text/plain".to_string()),
                size: content.len() as u64,
            })
            .await
            .expect("Failed to register upload")
    }

    /// Uploads a CV and a project report and returns a request for `job_title`.
    pub async fn request(&self, job_title: &str) -> EvaluationRequest {
        let cv = self
            .upload_text(
                "cv.txt",
                "Jane Doe\nBackend engineer, 6 years of Rust, Go and PostgreSQL.\nBuilt payment APIs.",
            )
            .await;
        let report = self
            .upload_text(
                "report.txt",
                "Inventory service in Rust with axum, SQLx, JWT auth, Docker and 85% test coverage.",
            )
            .await;
        EvaluationRequest::new(job_title, cv.id, report.id)
    }
}

/// Polls until `job_id` reaches `status`.
pub async fn wait_for_status(
    orchestrator: &JobOrchestrator,
    job_id: &str,
    status: JobStatus,
) -> JobView {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let view = orchestrator
            .get_job_status(job_id)
            .await
            .unwrap()
            .expect("job disappeared");
        if view.status == status {
            return view;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} stuck in {} waiting for {}",
            job_id,
            view.status,
            status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Polls until `job_id` is completed or failed.
pub async fn wait_for_terminal(orchestrator: &JobOrchestrator, job_id: &str) -> JobView {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let view = orchestrator
            .get_job_status(job_id)
            .await
            .unwrap()
            .expect("job disappeared");
        if view.status.is_terminal() {
            return view;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} never finished, last status {}",
            job_id,
            view.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
