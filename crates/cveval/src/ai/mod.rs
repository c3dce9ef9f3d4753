//! LLM access for the evaluation pipeline.
//!
//! [`AiClient`] wraps an [`LlmBackend`] with bounded retries and structured
//! output parsing. [`OpenAiBackend`] is the HTTP backend used in production;
//! tests plug in scripted backends.

mod backend;
mod client;
mod error;
mod parse;

pub use backend::{CompletionRequest, LlmBackend, OpenAiBackend, DEFAULT_BASE_URL};
pub use client::{AiClient, AiSettings, DEFAULT_SYSTEM_PROMPT};
pub use error::{AiError, LlmError};
pub use parse::{extract_json, parse_structured};
