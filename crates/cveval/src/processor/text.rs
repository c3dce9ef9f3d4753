use std::path::Path;

use crate::error::ProcessError;
use crate::processor::{DocumentFormat, DocumentProcessor};

/// Plain text reader. Invalid UTF-8 sequences are replaced, not rejected.
pub struct TextProcessor;

impl TextProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TextProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentProcessor for TextProcessor {
    fn extract(&self, path: &Path) -> Result<String, ProcessError> {
        let bytes = std::fs::read(path).map_err(|e| ProcessError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;

        let text = String::from_utf8_lossy(&bytes).into_owned();
        if text.trim().is_empty() {
            return Err(ProcessError::NoText {
                path: path.to_path_buf(),
            });
        }
        Ok(text)
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_process_text_file() {
        let mut temp_file = NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(temp_file, "Built a queue-backed evaluation service").unwrap();

        let text = TextProcessor::new().extract(temp_file.path()).unwrap();
        assert!(text.contains("queue-backed"));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut temp_file = NamedTempFile::with_suffix(".txt").unwrap();
        temp_file.write_all(b"caf\xe9 owner").unwrap();

        let text = TextProcessor::new().extract(temp_file.path()).unwrap();
        assert!(text.ends_with(" owner"));
    }

    #[test]
    fn test_blank_file_has_no_text() {
        let mut temp_file = NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(temp_file, "   ").unwrap();
        assert!(matches!(
            TextProcessor::new().extract(temp_file.path()),
            Err(ProcessError::NoText { .. })
        ));
    }

    #[test]
    fn test_supports_text_format() {
        assert!(TextProcessor::new().supports(DocumentFormat::Text));
        assert!(!TextProcessor::new().supports(DocumentFormat::Pdf));
    }
}
