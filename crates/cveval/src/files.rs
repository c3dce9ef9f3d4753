//! File records for uploaded CVs and project reports.
//!
//! The upload collaborator writes the bytes to disk and then calls
//! [`FileRegistry::register`], which validates the upload and persists the
//! record that jobs reference by id.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{FileStore, StoreError};

pub const PDF_MIME: &str = "application/pdf";
pub const TEXT_MIME: &str = "text/plain";

/// 10 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// An uploaded document. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub filename: String,
    pub path: PathBuf,
    pub mimetype: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// What the upload layer knows about a stored file.
#[derive(Debug, Clone)]
pub struct NewFile {
    /// Original client-side filename.
    pub filename: String,
    /// Where the bytes were written.
    pub path: PathBuf,
    /// Declared content type. Guessed from `filename` when absent.
    pub mimetype: Option<String>,
    pub size: u64,
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Filename must not be empty")]
    EmptyFilename,

    #[error("File '{filename}' is empty")]
    EmptyFile { filename: String },

    #[error("Unsupported file type '{mimetype}'; only {allowed} files are allowed")]
    UnsupportedMediaType { mimetype: String, allowed: String },

    #[error("File is {size} bytes; the limit is {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("Failed to save file record: {0}")]
    Store(#[from] StoreError),
}

/// Which uploads are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_file_size: u64,
    pub allowed_mimetypes: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_mimetypes: vec![PDF_MIME.to_string(), TEXT_MIME.to_string()],
        }
    }
}

impl UploadPolicy {
    /// Returns the effective mimetype of an accepted upload.
    pub fn check(&self, file: &NewFile) -> Result<String, UploadError> {
        if file.filename.trim().is_empty() {
            return Err(UploadError::EmptyFilename);
        }
        if file.size == 0 {
            return Err(UploadError::EmptyFile {
                filename: file.filename.clone(),
            });
        }
        if file.size > self.max_file_size {
            return Err(UploadError::TooLarge {
                size: file.size,
                max: self.max_file_size,
            });
        }

        let mimetype = file
            .mimetype
            .clone()
            .filter(|m| !m.trim().is_empty())
            .or_else(|| guess_mimetype(&file.filename))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        if !self.allowed_mimetypes.iter().any(|m| m == &mimetype) {
            return Err(UploadError::UnsupportedMediaType {
                mimetype,
                allowed: self.allowed_mimetypes.join(", "),
            });
        }
        Ok(mimetype)
    }
}

fn guess_mimetype(filename: &str) -> Option<String> {
    mime_guess::from_path(filename).first().map(|m| m.to_string())
}

/// Builds the on-disk name for an upload: `{stem}_{millis}_{random}{.ext}`.
pub fn storage_filename(original: &str, now: DateTime<Utc>) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    let random = uuid::Uuid::new_v4().simple().to_string();

    format!("{}_{}_{}{}", stem, now.timestamp_millis(), &random[..10], ext)
}

/// Entry point for the upload collaborator.
pub struct FileRegistry {
    store: Arc<dyn FileStore>,
    upload_dir: PathBuf,
    policy: UploadPolicy,
}

impl FileRegistry {
    pub fn new(store: Arc<dyn FileStore>, upload_dir: PathBuf, policy: UploadPolicy) -> Self {
        Self {
            store,
            upload_dir,
            policy,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Creates the upload directory if it does not exist yet.
    pub fn ensure_upload_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.upload_dir)
    }

    /// Where the upload layer should write a file named `original`.
    pub fn storage_path(&self, original: &str) -> PathBuf {
        self.upload_dir.join(storage_filename(original, Utc::now()))
    }

    /// Validates and persists a file record, returning it with its new id.
    pub async fn register(&self, file: NewFile) -> Result<FileRecord, UploadError> {
        let mimetype = self.policy.check(&file)?;
        let record = FileRecord {
            id: uuid::Uuid::new_v4().to_string(),
            filename: file.filename,
            path: file.path,
            mimetype,
            size: file.size,
            created_at: Utc::now(),
        };
        self.store.insert_file(&record).await?;

        tracing::info!(file_id = %record.id, mimetype = %record.mimetype, size = record.size, "Registered upload");
        Ok(record)
    }

    pub async fn find(&self, id: &str) -> Result<Option<FileRecord>, StoreError> {
        self.store.find_file(id).await
    }
}
