use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use super::backend::{CompletionRequest, LlmBackend};
use super::error::{AiError, LlmError};
use super::parse::parse_structured;
use crate::sanitize::{truncate_for_log, MAX_LOGGED_RESPONSE};

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an expert HR and technical reviewer. Always respond with valid JSON format.";

/// Request shape and retry policy of the AI client.
#[derive(Debug, Clone, PartialEq)]
pub struct AiSettings {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Total attempts per call, including the first.
    pub max_retries: u32,
    /// Delay after attempt `n` is `backoff_unit * 2^n`.
    pub backoff_unit: Duration,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: 0.3,
            max_tokens: 2000,
            max_retries: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

/// Retrying front end to an [`LlmBackend`].
#[derive(Clone)]
pub struct AiClient {
    backend: Arc<dyn LlmBackend>,
    settings: AiSettings,
}

impl AiClient {
    pub fn new(backend: Arc<dyn LlmBackend>, settings: AiSettings) -> Self {
        Self { backend, settings }
    }

    pub fn settings(&self) -> &AiSettings {
        &self.settings
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.settings
            .backoff_unit
            .saturating_mul(1u32 << attempt.min(16))
    }

    /// Sends `prompt` and returns the raw model text.
    ///
    /// Transport errors, error statuses and empty responses are retried up to
    /// `max_retries` attempts in total.
    pub async fn call(&self, prompt: &str) -> Result<String, AiError> {
        let request = CompletionRequest {
            model: self.settings.model.clone(),
            system_prompt: self.settings.system_prompt.clone(),
            user_prompt: prompt.to_string(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        let max_attempts = self.settings.max_retries.max(1);

        let mut attempt = 1;
        loop {
            let error = match self.backend.complete(&request).await {
                Ok(content) if !content.trim().is_empty() => return Ok(content),
                Ok(_) => LlmError::EmptyResponse,
                Err(e) => e,
            };

            tracing::warn!(attempt, max_attempts, error = %error, "LLM call failed");
            if attempt >= max_attempts {
                return Err(AiError::RetriesExhausted {
                    attempts: attempt,
                    source: error,
                });
            }

            tokio::time::sleep(self.backoff(attempt)).await;
            attempt += 1;
        }
    }

    /// [`call`](Self::call) followed by [`parse_structured`]. Parse failures
    /// are returned as is, without another call.
    pub async fn call_structured<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, AiError> {
        let raw = self.call(prompt).await?;
        parse_structured(&raw).inspect_err(|e| {
            tracing::error!(error = %e, response = %truncate_for_log(&raw, MAX_LOGGED_RESPONSE), "Could not parse model response");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Replays a fixed script of responses and records when it was called.
    struct Scripted {
        script: Mutex<VecDeque<Result<String, LlmError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl Scripted {
        fn new(script: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmBackend for Scripted {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::Network("script exhausted".into())))
        }
    }

    fn unavailable() -> Result<String, LlmError> {
        Err(LlmError::Status {
            status: 503,
            body: "overloaded".into(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_exponential_backoff() {
        let backend = Scripted::new(vec![
            unavailable(),
            Err(LlmError::Network("reset".into())),
            Ok("{\"ok\": true}".into()),
        ]);
        let client = AiClient::new(backend.clone(), AiSettings::default());

        let content = client.call("prompt").await.unwrap();
        assert_eq!(content, "{\"ok\": true}");

        let calls = backend.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(2));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let backend = Scripted::new(vec![unavailable(), unavailable(), unavailable(), Ok("{}".into())]);
        let client = AiClient::new(backend.clone(), AiSettings::default());

        let err = client.call("prompt").await.unwrap_err();
        match err {
            AiError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, LlmError::Status { status: 503, .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(backend.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_content_is_retried() {
        let backend = Scripted::new(vec![Ok("   ".into()), Ok("{\"x\":1}".into())]);
        let client = AiClient::new(backend.clone(), AiSettings::default());

        assert_eq!(client.call("prompt").await.unwrap(), "{\"x\":1}");
        assert_eq!(backend.calls().len(), 2);
    }

    #[derive(Debug, Deserialize)]
    struct Verdict {
        #[allow(dead_code)]
        score: f64,
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_errors_are_not_retried() {
        let backend = Scripted::new(vec![
            Ok("I am unable to produce JSON today.".into()),
            Ok("{\"score\": 4}".into()),
        ]);
        let client = AiClient::new(backend.clone(), AiSettings::default());

        let err = client.call_structured::<Verdict>("prompt").await.unwrap_err();
        assert!(matches!(err, AiError::NoJsonFound));
        assert_eq!(backend.calls().len(), 1);
    }

    #[test]
    fn test_default_settings() {
        let settings = AiSettings::default();
        assert_eq!(settings.model, "gpt-4");
        assert_eq!(settings.max_tokens, 2000);
        assert!((settings.temperature - 0.3).abs() < f32::EPSILON);
        assert!(settings.system_prompt.contains("valid JSON"));
    }
}
