//! Tool Loader
//!
//! Materializes catalog entries into live tool objects. Builtin kinds map
//! to in-process constructors; `http` manifests become proxy tools that
//! template their arguments into a remote call.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::catalog::{CatalogEntry, HttpSpec, ToolCatalog, ToolManifest};
use super::{BreakerPolicy, RetryPolicy, Tool, ToolOutput};
use crate::agent::provider::LlmProvider;
use crate::agent::{AgentError, AgentResult};

/// Turns a catalog entry into an executable tool.
#[async_trait]
pub trait ToolLoader: Send + Sync {
    async fn load(&self, entry: &CatalogEntry) -> AgentResult<Arc<dyn Tool>>;
}

/// Default loader: reads the manifest behind the entry and dispatches on
/// its `kind`.
pub struct ManifestLoader {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl ManifestLoader {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl ToolLoader for ManifestLoader {
    async fn load(&self, entry: &CatalogEntry) -> AgentResult<Arc<dyn Tool>> {
        let Some(ref path) = entry.source_path else {
            return Err(AgentError::UnknownTool(format!(
                "{} has no source to load from",
                entry.name
            )));
        };
        let manifest = ToolCatalog::read_manifest(path)?;
        info!("Loading tool '{}' ({})", manifest.name, manifest.kind);

        match manifest.kind.as_str() {
            "http" => Ok(Arc::new(HttpProxyTool::from_manifest(manifest)?)),
            "calculator" => Ok(Arc::new(super::builtin::CalculatorTool)),
            "web_search" => Ok(Arc::new(super::builtin::WebSearchTool::new())),
            "summarize_text" => Ok(Arc::new(super::builtin::SummarizeTool::new(
                self.provider.clone(),
                self.model.clone(),
            ))),
            "read_file" => Ok(Arc::new(super::builtin::FileReadTool)),
            "current_time" => Ok(Arc::new(super::builtin::CurrentTimeTool)),
            other => Err(AgentError::UnknownTool(format!(
                "{}: unsupported tool kind '{}'",
                entry.name, other
            ))),
        }
    }
}

/// A tool defined entirely by a manifest: substitutes `{arg}` placeholders
/// into a URL template and proxies the call.
pub struct HttpProxyTool {
    name: String,
    description: String,
    category: String,
    parameters: Value,
    sensitive: bool,
    retry: RetryPolicy,
    breaker: BreakerPolicy,
    spec: HttpSpec,
    client: reqwest::Client,
}

impl HttpProxyTool {
    pub fn from_manifest(manifest: ToolManifest) -> AgentResult<Self> {
        let spec = manifest.http.ok_or_else(|| {
            AgentError::UnknownTool(format!("{}: http manifest without http spec", manifest.name))
        })?;
        let parameters = if manifest.parameters.is_object() {
            manifest.parameters
        } else {
            json!({"type": "object", "properties": {}})
        };
        Ok(Self {
            name: manifest.name,
            description: manifest.description,
            category: manifest.category,
            parameters,
            sensitive: manifest.sensitive,
            retry: manifest.retry.unwrap_or_default(),
            breaker: manifest.breaker.unwrap_or_default(),
            spec,
            client: reqwest::Client::new(),
        })
    }

    fn render_url(&self, args: &Value) -> String {
        let mut url = self.spec.url.clone();
        if let Some(obj) = args.as_object() {
            for (key, value) in obj {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                url = url.replace(&format!("{{{}}}", key), &text);
            }
        }
        url
    }
}

#[async_trait]
impl Tool for HttpProxyTool {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    fn sensitive(&self) -> bool {
        self.sensitive
    }

    fn categories(&self) -> Vec<String> {
        vec![self.category.clone()]
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn breaker_policy(&self) -> BreakerPolicy {
        self.breaker
    }

    async fn execute(&self, params: Value) -> AgentResult<ToolOutput> {
        let url = self.render_url(&params);
        let request = match self.spec.method.to_uppercase().as_str() {
            "POST" => self.client.post(&url).json(&params),
            _ => self.client.get(&url),
        };
        let response = request
            .send()
            .await
            .map_err(|e| AgentError::Tool(format!("{}: {}", self.name, e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AgentError::Tool(format!("{}: body: {}", self.name, e)))?;

        let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text.clone()));
        let summary = crate::agent::truncate(&text, 300);

        if status.is_success() {
            Ok(ToolOutput::success(data, summary))
        } else {
            Ok(ToolOutput::failure(format!("{} -> {}: {}", self.name, status, summary)))
        }
    }
}
