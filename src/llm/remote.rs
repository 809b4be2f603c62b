//! Remote reasoning model client (Anthropic messages API).
//!
//! Carries the long-context planning calls. Compared to the local client
//! the timeouts are minutes rather than seconds, and rate limiting honors
//! the server's retry-after header instead of the generic backoff curve.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::json::extract_json;
use super::{retry_backoff, sleep_with_cancellation};
use crate::config::RemoteLlmConfig;
use crate::error::{PipelineError, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone, Debug)]
pub struct RemoteLlm {
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
    max_retries: u32,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl RemoteLlm {
    pub fn from_config(config: &RemoteLlmConfig) -> Result<Self> {
        let api_key = config.resolved_api_key().ok_or_else(|| {
            PipelineError::validation(
                "remote LLM API key not configured (set ANTHROPIC_API_KEY or remote_llm.api_key)",
            )
        })?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
        })
    }

    pub fn is_configured(config: &RemoteLlmConfig) -> bool {
        config.resolved_api_key().is_some()
    }

    /// One deliberative call; retries transient failures, honoring
    /// retry-after on rate limits.
    pub fn deliberate(
        &self,
        prompt: &str,
        system: Option<&str>,
        max_tokens: Option<u32>,
        cancel: &Arc<AtomicBool>,
    ) -> Result<String> {
        let attempts = self.max_retries.max(1);
        let mut last: Option<PipelineError> = None;

        for attempt in 1..=attempts {
            if cancel.load(Ordering::Relaxed) {
                return Err(PipelineError::cancelled());
            }

            match self.request_once(prompt, system, max_tokens) {
                Ok(text) => return Ok(text),
                Err(RequestFailure::RateLimited(retry_after)) => {
                    tracing::warn!(attempt, retry_after_secs = retry_after, "remote LLM rate limited");
                    if attempt == attempts {
                        return Err(PipelineError::unavailable(format!(
                            "rate limited after {attempts} attempts"
                        )));
                    }
                    sleep_with_cancellation(cancel, Duration::from_secs(retry_after))?;
                    last = Some(PipelineError::new(
                        crate::error::ErrorKind::RateLimit,
                        "rate limited",
                    ));
                }
                Err(RequestFailure::Transient(err)) => {
                    tracing::warn!(attempt, error = %err, "remote LLM transient failure");
                    if attempt == attempts {
                        return Err(PipelineError::unavailable(format!(
                            "gave up after {attempts} attempts: {err}"
                        )));
                    }
                    sleep_with_cancellation(cancel, retry_backoff(attempt, 2_000, 60_000))?;
                    last = Some(err);
                }
                Err(RequestFailure::Permanent(err)) => return Err(err),
            }
        }

        Err(last.unwrap_or_else(|| PipelineError::unavailable("retry loop exhausted")))
    }

    /// `deliberate` followed by lenient JSON extraction.
    pub fn deliberate_json(
        &self,
        prompt: &str,
        system: Option<&str>,
        max_tokens: Option<u32>,
        cancel: &Arc<AtomicBool>,
    ) -> Result<Value> {
        let text = self.deliberate(prompt, system, max_tokens, cancel)?;
        extract_json(&text)
    }

    fn request_once(
        &self,
        prompt: &str,
        system: Option<&str>,
        max_tokens: Option<u32>,
    ) -> std::result::Result<String, RequestFailure> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: max_tokens.unwrap_or(self.max_tokens),
            system,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        let result = agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .set("x-api-key", &self.api_key)
            .set("anthropic-version", ANTHROPIC_VERSION)
            .send_json(&request);

        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(429, response)) => {
                let retry_after = response
                    .header("retry-after")
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(30);
                return Err(RequestFailure::RateLimited(retry_after));
            }
            Err(ureq::Error::Status(529, _)) => {
                return Err(RequestFailure::Transient(PipelineError::network(
                    "server overloaded (529)",
                )));
            }
            Err(err) => {
                let mapped: PipelineError = err.into();
                return if mapped.is_transient() {
                    Err(RequestFailure::Transient(mapped))
                } else {
                    Err(RequestFailure::Permanent(mapped))
                };
            }
        };

        let body: MessagesResponse = response
            .into_json()
            .map_err(|e| RequestFailure::Permanent(PipelineError::malformed(e.to_string())))?;

        let text = body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(RequestFailure::Permanent(PipelineError::malformed(
                "empty response from remote model",
            )));
        }

        Ok(text)
    }
}

enum RequestFailure {
    RateLimited(u64),
    Transient(PipelineError),
    Permanent(PipelineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_validation_error() {
        let config = RemoteLlmConfig::default();
        // Only meaningful when the environment has no key set.
        if std::env::var("ANTHROPIC_API_KEY").is_err() {
            let err = RemoteLlm::from_config(&config).unwrap_err();
            assert_eq!(err.kind, crate::error::ErrorKind::Validation);
            assert!(!RemoteLlm::is_configured(&config));
        }
    }

    #[test]
    fn test_configured_with_explicit_key() {
        let config = RemoteLlmConfig {
            api_key: Some("sk-test".to_string()),
            ..RemoteLlmConfig::default()
        };
        assert!(RemoteLlm::is_configured(&config));
        let llm = RemoteLlm::from_config(&config).unwrap();
        assert_eq!(llm.max_tokens, 16000);
    }
}
