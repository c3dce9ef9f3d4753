//! AI client error types.

use thiserror::Error;

/// A single failed call to the model backend.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Connection failed, timed out, or the body could not be read.
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response.
    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Empty response from model")]
    EmptyResponse,

    /// The response envelope did not have the expected shape.
    #[error("Malformed API response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum AiError {
    #[error("LLM call failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: LlmError,
    },

    #[error("No JSON found in response")]
    NoJsonFound,

    #[error("Invalid JSON response from AI service: {0}")]
    InvalidJson(#[source] serde_json::Error),
}
