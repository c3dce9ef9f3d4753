//! Structured output extraction from free-form model text.

use serde::de::DeserializeOwned;

use super::error::AiError;

/// Returns the first balanced `{...}` block of `response`.
///
/// Braces inside JSON strings (including escaped quotes) do not count.
pub fn extract_json(response: &str) -> Option<&str> {
    let start = response.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in response[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&response[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Decodes the first JSON object in `raw` into `T`.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, AiError> {
    let json = extract_json(raw).ok_or(AiError::NoJsonFound)?;
    serde_json::from_str(json).map_err(AiError::InvalidJson)
}
