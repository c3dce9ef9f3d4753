//! Text extraction from uploaded documents.

pub mod pdf;
pub mod text;

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProcessError;

/// Formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Text,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "txt" | "text" | "md" => Some(DocumentFormat::Text),
            _ => None,
        }
    }

    pub fn from_mimetype(mimetype: &str) -> Option<Self> {
        match mimetype {
            "application/pdf" => Some(DocumentFormat::Pdf),
            "text/plain" | "text/markdown" => Some(DocumentFormat::Text),
            _ => None,
        }
    }
}

pub trait DocumentProcessor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String, ProcessError>;
    fn supports(&self, format: DocumentFormat) -> bool;
}

pub struct ProcessorRegistry {
    processors: Vec<Box<dyn DocumentProcessor>>,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            processors: vec![
                Box::new(text::TextProcessor::new()),
                Box::new(pdf::PdfProcessor::new()),
            ],
        }
    }

    /// Picks a processor by extension, sniffing the PDF header when the
    /// extension is missing or unknown.
    pub fn detect_format(&self, path: &Path) -> Result<DocumentFormat, ProcessError> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if let Some(format) = DocumentFormat::from_extension(extension) {
            return Ok(format);
        }

        let mut header = [0u8; 5];
        let sniffed = std::fs::File::open(path)
            .and_then(|mut f| f.read_exact(&mut header))
            .is_ok();
        if sniffed && &header == b"%PDF-" {
            return Ok(DocumentFormat::Pdf);
        }

        Err(ProcessError::UnsupportedFormat(extension.to_string()))
    }

    pub fn extract(&self, path: &Path) -> Result<String, ProcessError> {
        let format = self.detect_format(path)?;
        self.extract_as(path, format)
    }

    pub fn extract_as(&self, path: &Path, format: DocumentFormat) -> Result<String, ProcessError> {
        self.processors
            .iter()
            .find(|p| p.supports(format))
            .ok_or_else(|| ProcessError::UnsupportedFormat(format!("{:?}", format)))?
            .extract(path)
    }
}

/// Turns a stored file into plain text for the pipeline.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, path: &Path) -> Result<String, ProcessError>;
}

/// Default extractor. Parsing runs on the blocking pool.
#[derive(Clone, Default)]
pub struct DocumentExtractor {
    registry: Arc<ProcessorRegistry>,
}

impl DocumentExtractor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TextExtractor for DocumentExtractor {
    async fn extract_text(&self, path: &Path) -> Result<String, ProcessError> {
        let registry = Arc::clone(&self.registry);
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || registry.extract(&owned))
            .await
            .map_err(|e| ProcessError::Interrupted(e.to_string()))?
    }
}
