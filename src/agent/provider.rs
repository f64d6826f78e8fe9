//! LLM Providers
//!
//! Thin completion interface consumed by the planner, the argument
//! inferencer and the summarize tool. Providers are asked for strict JSON
//! by instruction; extraction of the trailing JSON object is the caller's
//! job.

use async_trait::async_trait;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::Ollama;
use serde_json::{json, Value};
use tracing::debug;

use super::{AgentError, AgentResult};

/// Prompt-to-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        prompt: String,
        system: Option<String>,
    ) -> AgentResult<String>;
}

/// Local Ollama backend.
pub struct OllamaProvider {
    ollama: Ollama,
}

impl OllamaProvider {
    pub fn new(ollama: Ollama) -> Self {
        Self { ollama }
    }

    pub fn from_host(host: &str, port: u16) -> Self {
        Self {
            ollama: Ollama::new(host.to_string(), port),
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn generate(
        &self,
        model: &str,
        prompt: String,
        system: Option<String>,
    ) -> AgentResult<String> {
        let mut request = GenerationRequest::new(model.to_string(), prompt);
        if let Some(system) = system {
            request = request.system(system);
        }
        let response = self
            .ollama
            .generate(request)
            .await
            .map_err(|e| AgentError::Llm(format!("ollama: {}", e)))?;
        Ok(response.response)
    }
}

/// Any OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn generate(
        &self,
        model: &str,
        prompt: String,
        system: Option<String>,
    ) -> AgentResult<String> {
        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!("LLM request to {} (model {})", url, model);

        let mut request = self.client.post(&url).json(&json!({
            "model": model,
            "messages": messages,
        }));
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AgentError::Llm(format!("request: {}", e)))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Llm(format!("response body: {}", e)))?;

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| AgentError::Llm(format!("unexpected completion shape: {}", body)))
    }
}
