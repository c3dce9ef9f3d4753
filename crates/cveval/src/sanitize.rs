//! Helpers for keeping candidate data out of logs and span attributes.
//!
//! CVs and project reports are personal documents. Spans may carry a file
//! name or a short excerpt of a model response, never full paths or full
//! documents.

use std::path::Path;

/// Upper bound on how much of an LLM response is echoed into a log line.
pub const MAX_LOGGED_RESPONSE: usize = 200;

/// Returns only the file name component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Truncates text to at most `max` bytes on a char boundary, appending a
/// marker when anything was cut.
pub fn truncate_for_log(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} bytes total)", &text[..end], text.len())
}
