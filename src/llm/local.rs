//! Local model client (Ollama-style API).
//!
//! Used for bulk per-file summarization and the short arbitration prompts
//! in duplicate and version resolution. One request per call; transient
//! failures retry with backoff and surface as `unavailable` when the
//! budget runs out.

use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use super::with_retries;
use crate::config::LocalLlmConfig;
use crate::error::Result;

#[derive(Clone)]
pub struct LocalLlm {
    endpoint: String,
    model: String,
    timeout: Duration,
    max_retries: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

impl LocalLlm {
    pub fn from_config(config: &LocalLlmConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            // Summarization wants near-deterministic output.
            temperature: config.temperature.clamp(0.0, 0.3),
        }
    }

    fn agent(&self) -> ureq::Agent {
        ureq::AgentBuilder::new().timeout(self.timeout).build()
    }

    /// Single-prompt completion.
    pub fn summarize(
        &self,
        prompt: &str,
        system: Option<&str>,
        cancel: &Arc<AtomicBool>,
    ) -> Result<String> {
        let url = format!("{}/api/generate", self.endpoint);

        with_retries(self.max_retries, 500, 30_000, cancel, || {
            let request = GenerateRequest {
                model: &self.model,
                prompt,
                system,
                stream: false,
                options: GenerateOptions {
                    temperature: self.temperature,
                    num_predict: 2000,
                },
            };

            let response = self
                .agent()
                .post(&url)
                .set("Content-Type", "application/json")
                .send_json(&request)?;

            let body: GenerateResponse = response
                .into_json()
                .map_err(|e| crate::error::PipelineError::malformed(e.to_string()))?;

            Ok(body.response)
        })
    }

    /// Whether the endpoint answers and knows the configured model.
    pub fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.endpoint);
        match self.agent().get(&url).call() {
            Ok(response) => {
                if let Ok(tags) = response.into_json::<TagsResponse>() {
                    let base = self.model.split(':').next().unwrap_or(&self.model);
                    let known = tags
                        .models
                        .iter()
                        .any(|m| m.name == self.model || m.name.starts_with(base));
                    if !known {
                        tracing::warn!(model = %self.model, "model not present on local LLM server");
                    }
                }
                true
            }
            Err(e) => {
                tracing::error!(error = %e, endpoint = %self.endpoint, "local LLM health check failed");
                false
            }
        }
    }
}
