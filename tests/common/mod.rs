//! Shared test doubles for the integration suites.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use steward::agent::{AgentError, AgentResult, HumanInterface, LlmProvider};
use steward::tools::{
    CatalogEntry, Embedder, RegistryConfig, Tool, ToolLoader, ToolOutput, ToolRegistry,
};

/// Deterministic embedder: hashes each text into a unit vector.
pub struct StubEmbedder {
    pub calls: AtomicUsize,
}

impl StubEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn vector_for(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 16];
        for (i, b) in text.bytes().enumerate() {
            v[i % 16] += b as f32;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn id(&self) -> String {
        "stub:v1".to_string()
    }

    fn dim(&self) -> usize {
        16
    }

    async fn embed(&self, texts: &[String]) -> AgentResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }
}

/// Replays canned completions; errors once the script runs dry.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(|s| s.to_string()).collect()),
        }
    }

    /// A provider with nothing to say; heuristics must carry the run.
    pub fn silent() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(
        &self,
        _model: &str,
        _prompt: String,
        _system: Option<String>,
    ) -> AgentResult<String> {
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| AgentError::Llm("scripted provider exhausted".to_string()))
    }
}

/// Approves or denies everything; answers questions with a canned reply.
pub struct MockHuman {
    pub approve: bool,
    pub answer: String,
    pub confirmations: AtomicUsize,
}

impl MockHuman {
    pub fn approving() -> Self {
        Self {
            approve: true,
            answer: "whatever you think is best".to_string(),
            confirmations: AtomicUsize::new(0),
        }
    }

    pub fn denying() -> Self {
        Self {
            approve: false,
            answer: String::new(),
            confirmations: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl HumanInterface for MockHuman {
    async fn confirm(&self, _summary: &str) -> AgentResult<bool> {
        self.confirmations.fetch_add(1, Ordering::SeqCst);
        Ok(self.approve)
    }

    async fn ask(&self, _question: &str) -> AgentResult<String> {
        Ok(self.answer.clone())
    }
}

/// Loader that counts invocations and returns trivial echo tools.
pub struct CountingLoader {
    pub loads: AtomicUsize,
}

impl CountingLoader {
    pub fn new() -> Self {
        Self {
            loads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ToolLoader for CountingLoader {
    async fn load(&self, entry: &CatalogEntry) -> AgentResult<Arc<dyn Tool>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(NamedEchoTool {
            name: entry.name.clone(),
            description: entry.description.clone(),
        }))
    }
}

pub struct NamedEchoTool {
    pub name: String,
    pub description: String,
}

#[async_trait]
impl Tool for NamedEchoTool {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, params: Value) -> AgentResult<ToolOutput> {
        Ok(ToolOutput::success(params, "echo"))
    }
}

/// Canned web search results without touching the network.
pub struct MockSearchTool;

#[async_trait]
impl Tool for MockSearchTool {
    fn name(&self) -> String {
        "web_search".to_string()
    }

    fn description(&self) -> String {
        "Search the web for current information.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "maxResults": {"type": "integer"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> AgentResult<ToolOutput> {
        let query = params["query"].as_str().unwrap_or_default();
        Ok(ToolOutput::success(
            json!({"results": [{
                "title": format!("Result for {}", query),
                "snippet": format!("Everything known about {}.", query),
                "url": "https://example.test/1"
            }]}),
            format!("1 result for '{}'", query),
        ))
    }
}

/// A registry over a temp data dir with a counting loader.
pub fn registry_with_loader(
    data_dir: &std::path::Path,
) -> (Arc<ToolRegistry>, Arc<CountingLoader>, Arc<StubEmbedder>) {
    let loader = Arc::new(CountingLoader::new());
    let embedder = Arc::new(StubEmbedder::new());
    let registry = Arc::new(ToolRegistry::new(
        RegistryConfig::under(data_dir),
        embedder.clone(),
        loader.clone(),
    ));
    (registry, loader, embedder)
}

/// Write a minimal http-kind manifest into the catalog directory.
pub fn write_manifest(catalog_dir: &std::path::Path, name: &str, description: &str) {
    std::fs::create_dir_all(catalog_dir).unwrap();
    std::fs::write(
        catalog_dir.join(format!("{}.json", name)),
        json!({
            "name": name,
            "description": description,
            "kind": "http",
            "http": {"url": "https://example.test"}
        })
        .to_string(),
    )
    .unwrap();
}
