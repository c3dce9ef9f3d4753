use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::ai::{AiError, LlmError};
use crate::db::DatabaseError;
use crate::files::UploadError;
use crate::orchestrator::OrchestratorError;
use crate::pipeline::PipelineError;
use crate::queue::QueueError;
use crate::secrets::SecretError;
use crate::store::StoreError;
use crate::worker::HandlerError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("AI error: {0}")]
    Ai(#[from] AiError),

    #[error("LLM backend error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Evaluation error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Failed to prepare upload directory '{path}': {source}")]
    UploadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Coarse classification for callers that map errors onto their own
/// surface, such as HTTP status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    UnsupportedMediaType,
    PayloadTooLarge,
    Conflict,
    /// The model or another external service failed or misbehaved.
    Upstream,
    Infrastructure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::UnsupportedMediaType => "unsupported_media_type",
            ErrorKind::PayloadTooLarge => "payload_too_large",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Infrastructure => "infrastructure",
        };
        f.write_str(name)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::Secret(_) => ErrorKind::InvalidInput,
            Error::Process(e) => e.kind(),
            Error::Database(e) => e.kind(),
            Error::Store(e) => e.kind(),
            Error::Queue(e) => e.kind(),
            Error::Ai(_) | Error::Llm(_) => ErrorKind::Upstream,
            Error::Pipeline(e) => e.kind(),
            Error::Handler(e) => e.kind(),
            Error::Orchestrator(e) => e.kind(),
            Error::Upload(e) => e.kind(),
            Error::UploadDir { .. } => ErrorKind::Infrastructure,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("No extractable text in '{path}'")]
    NoText { path: PathBuf },

    #[error("Text extraction was interrupted: {0}")]
    Interrupted(String),
}

impl ProcessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessError::UnsupportedFormat(_) => ErrorKind::UnsupportedMediaType,
            ProcessError::ReadDocument { source, .. }
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                ErrorKind::NotFound
            }
            ProcessError::ReadDocument { .. } | ProcessError::Interrupted(_) => {
                ErrorKind::Infrastructure
            }
            ProcessError::PdfProcessing(_) | ProcessError::NoText { .. } => {
                ErrorKind::InvalidInput
            }
        }
    }
}

impl DatabaseError {
    /// True when SQLite rejected a write on a UNIQUE, CHECK or similar
    /// constraint.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }

    pub fn kind(&self) -> ErrorKind {
        if self.is_constraint_violation() {
            ErrorKind::Conflict
        } else {
            ErrorKind::Infrastructure
        }
    }
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Database(e) => e.kind(),
            StoreError::Encode(_) | StoreError::Decode { .. } => ErrorKind::Infrastructure,
        }
    }
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Database(e) => e.kind(),
            QueueError::Encode { .. } => ErrorKind::Infrastructure,
        }
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Stage { .. } => ErrorKind::Upstream,
            PipelineError::Incomplete(_) | PipelineError::Render { .. } => {
                ErrorKind::Infrastructure
            }
        }
    }
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Store(e) => e.kind(),
            OrchestratorError::Enqueue { .. } => ErrorKind::Infrastructure,
        }
    }
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::EmptyFilename | UploadError::EmptyFile { .. } => ErrorKind::InvalidInput,
            UploadError::UnsupportedMediaType { .. } => ErrorKind::UnsupportedMediaType,
            UploadError::TooLarge { .. } => ErrorKind::PayloadTooLarge,
            UploadError::Store(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
