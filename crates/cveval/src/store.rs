//! Durable store for job and file records.
//!
//! The orchestrator and workers only see the [`JobStore`] and [`FileStore`]
//! traits. [`SqliteStore`] is the default implementation on top of
//! [`Database`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::file_repo::{self, FileRow};
use crate::db::job_repo::{self, JobRow, WriteOutcome};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::files::FileRecord;
use crate::job::{EvaluationResult, Job, JobState, JobStatus};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to encode evaluation result: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Stored record '{id}' is invalid: {reason}")]
    Decode { id: String, reason: String },
}

/// Result of a status write against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// The job had already reached a terminal status; nothing was written.
    TerminalGuarded,
    NotFound,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn find_job(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Overwrites status, result, error and `updated_at`. Implementations must
    /// leave terminal jobs untouched and report `TerminalGuarded`.
    async fn write_state(
        &self,
        id: &str,
        state: &JobState,
        at: DateTime<Utc>,
    ) -> Result<UpdateOutcome, StoreError>;
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn insert_file(&self, file: &FileRecord) -> Result<(), StoreError>;

    async fn find_file(&self, id: &str) -> Result<Option<FileRecord>, StoreError>;
}

/// SQLite-backed implementation of both stores. Every call runs on the
/// blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn encode_state(state: &JobState) -> Result<(Option<String>, Option<&str>), StoreError> {
    let result = state
        .result()
        .map(serde_json::to_string)
        .transpose()
        .map_err(StoreError::Encode)?;
    Ok((result, state.error()))
}

fn decode_job(row: JobRow) -> Result<Job, StoreError> {
    let decode_err = |reason: String| StoreError::Decode {
        id: row.id.clone(),
        reason,
    };

    let status: JobStatus = row.status.parse().map_err(|e| decode_err(format!("{}", e)))?;
    let state = match status {
        JobStatus::Queued => JobState::Queued,
        JobStatus::Processing => JobState::Processing,
        JobStatus::Completed => {
            let raw = row
                .result
                .as_deref()
                .ok_or_else(|| decode_err("completed job without result".to_string()))?;
            let result: EvaluationResult = serde_json::from_str(raw)
                .map_err(|e| decode_err(format!("bad result payload: {}", e)))?;
            JobState::Completed(result)
        }
        JobStatus::Failed => JobState::Failed(
            row.error
                .clone()
                .ok_or_else(|| decode_err("failed job without error".to_string()))?,
        ),
    };

    Ok(Job {
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
        id: row.id,
        job_title: row.job_title,
        cv_id: row.cv_id,
        project_report_id: row.project_report_id,
        state,
    })
}

fn decode_file(row: FileRow) -> Result<FileRecord, StoreError> {
    let size = u64::try_from(row.size).map_err(|_| StoreError::Decode {
        id: row.id.clone(),
        reason: format!("negative size {}", row.size),
    })?;
    Ok(FileRecord {
        created_at: parse_timestamp(&row.created_at)?,
        id: row.id,
        filename: row.filename,
        path: row.path.into(),
        mimetype: row.mimetype,
        size,
    })
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        let (result, error) = encode_state(&job.state)?;
        let row = JobRow {
            id: job.id.clone(),
            job_title: job.job_title.clone(),
            cv_id: job.cv_id.clone(),
            project_report_id: job.project_report_id.clone(),
            status: job.status().as_str().to_string(),
            result,
            error: error.map(str::to_string),
            created_at: format_timestamp(job.created_at),
            updated_at: format_timestamp(job.updated_at),
        };
        self.db
            .run_blocking(move |db| Ok(job_repo::insert(db, &row)?))
            .await
    }

    async fn find_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let id = id.to_string();
        self.db
            .run_blocking(move |db| job_repo::find_by_id(db, &id)?.map(decode_job).transpose())
            .await
    }

    async fn write_state(
        &self,
        id: &str,
        state: &JobState,
        at: DateTime<Utc>,
    ) -> Result<UpdateOutcome, StoreError> {
        let (result, error) = encode_state(state)?;
        let id = id.to_string();
        let status = state.status().as_str();
        let error = error.map(str::to_string);
        let at = format_timestamp(at);
        let outcome = self
            .db
            .run_blocking(move |db| {
                job_repo::write_status(
                    db,
                    &id,
                    status,
                    result.as_deref(),
                    error.as_deref(),
                    &at,
                )
            })
            .await?;
        Ok(match outcome {
            WriteOutcome::Written => UpdateOutcome::Updated,
            WriteOutcome::Terminal => UpdateOutcome::TerminalGuarded,
            WriteOutcome::Missing => UpdateOutcome::NotFound,
        })
    }
}

#[async_trait]
impl FileStore for SqliteStore {
    async fn insert_file(&self, file: &FileRecord) -> Result<(), StoreError> {
        let size = i64::try_from(file.size).map_err(|_| StoreError::Decode {
            id: file.id.clone(),
            reason: format!("size {} does not fit the files table", file.size),
        })?;
        let row = FileRow {
            id: file.id.clone(),
            filename: file.filename.clone(),
            path: file.path.to_string_lossy().into_owned(),
            mimetype: file.mimetype.clone(),
            size,
            created_at: format_timestamp(file.created_at),
        };
        self.db
            .run_blocking(move |db| Ok(file_repo::insert(db, &row)?))
            .await
    }

    async fn find_file(&self, id: &str) -> Result<Option<FileRecord>, StoreError> {
        let id = id.to_string();
        self.db
            .run_blocking(move |db| file_repo::find_by_id(db, &id)?.map(decode_file).transpose())
            .await
    }
}
