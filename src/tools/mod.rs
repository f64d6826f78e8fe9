//! Tool Surface
//!
//! The uniform capability set every tool exposes to the agent: describe
//! itself, validate arguments, execute. Individual tools live in
//! `builtin` or are materialized from catalog manifests by the loader.

mod builtin;
mod cache;
mod catalog;
mod embedding;
mod index;
mod loader;
mod registry;
mod reliability;
#[cfg(test)]
pub(crate) mod testutil;

pub use builtin::{
    CalculatorTool, CurrentTimeTool, FileReadTool, SummarizeTool, WebSearchTool,
};
pub use cache::{CacheLimits, DynamicToolCache};
pub use catalog::{CatalogEntry, HttpSpec, ToolCatalog, ToolManifest};
pub use embedding::{Embedder, FastembedEmbedder};
pub use index::{EmbeddingIndex, IndexRecord};
pub use loader::{HttpProxyTool, ManifestLoader, ToolLoader};
pub use registry::{RegistryConfig, ToolRegistry};
pub use reliability::{BreakerState, ToolExecutor};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::{AgentError, AgentResult};

/// Retry behavior for one tool invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            base_delay_ms: 400,
        }
    }
}

/// Circuit-breaker thresholds for one tool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerPolicy {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_ms: 30_000,
        }
    }
}

/// Outcome of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub data: Value,
    pub summary: String,
}

impl ToolOutput {
    pub fn success(data: Value, summary: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            summary: summary.into(),
        }
    }

    pub fn failure(summary: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            summary: summary.into(),
        }
    }
}

/// A tool the agent can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> String;

    fn description(&self) -> String;

    /// JSON schema for the arguments (object with `properties`/`required`).
    fn parameters(&self) -> Value;

    /// Sensitive tools require human approval in `sensitive` mode.
    fn sensitive(&self) -> bool {
        false
    }

    fn categories(&self) -> Vec<String> {
        Vec::new()
    }

    /// Ranking hint, 0..=100.
    fn priority(&self) -> u8 {
        50
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    fn breaker_policy(&self) -> BreakerPolicy {
        BreakerPolicy::default()
    }

    async fn execute(&self, params: Value) -> AgentResult<ToolOutput>;
}

/// Top-level property names of a tool's argument schema, in declaration
/// order. Used by the argument inferencer for introspection.
pub fn schema_keys(schema: &Value) -> Vec<String> {
    schema["properties"]
        .as_object()
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default()
}

/// Structural validation of `args` against a tool's declared schema:
/// args must be an object, every `required` key present, and declared
/// property types respected.
pub fn validate_args(tool: &dyn Tool, args: &Value) -> AgentResult<()> {
    let schema = tool.parameters();
    let fail = |reason: String| AgentError::SchemaValidation {
        tool: tool.name(),
        reason,
    };

    let obj = args
        .as_object()
        .ok_or_else(|| fail(format!("expected an object, got {}", type_name(args))))?;

    if let Some(required) = schema["required"].as_array() {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !obj.contains_key(key) {
                return Err(fail(format!("missing required key '{}'", key)));
            }
        }
    }

    if let Some(props) = schema["properties"].as_object() {
        for (key, value) in obj {
            let Some(declared) = props.get(key) else {
                continue;
            };
            let Some(expected) = declared["type"].as_str() else {
                continue;
            };
            if !type_matches(expected, value) {
                return Err(fail(format!(
                    "key '{}' expected {}, got {}",
                    key,
                    expected,
                    type_name(value)
                )));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Rough in-memory footprint of a loaded tool, used for cache accounting.
pub fn estimate_tool_bytes(tool: &dyn Tool) -> u64 {
    let schema = serde_json::to_string(&tool.parameters())
        .map(|s| s.len())
        .unwrap_or(0);
    // Descriptor strings plus a fixed overhead for the vtable and state.
    (tool.name().len() + tool.description().len() + schema) as u64 + 4096
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct ProbeTool;

    #[async_trait]
    impl Tool for ProbeTool {
        fn name(&self) -> String {
            "probe".to_string()
        }

        fn description(&self) -> String {
            "Probe tool for schema tests".to_string()
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

        async fn execute(&self, _params: Value) -> AgentResult<ToolOutput> {
            Ok(ToolOutput::success(Value::Null, "ok"))
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_args() {
        let args = json!({"query": "rust", "maxResults": 5});
        assert!(validate_args(&ProbeTool, &args).is_ok());
    }

    #[test]
    fn test_validate_rejects_non_object() {
        let err = validate_args(&ProbeTool, &json!("bare string")).unwrap_err();
        assert!(err.to_string().contains("expected an object"));
    }

    #[test]
    fn test_validate_rejects_missing_required() {
        let err = validate_args(&ProbeTool, &json!({"maxResults": 5})).unwrap_err();
        assert!(err.to_string().contains("missing required key 'query'"));
    }

    #[test]
    fn test_validate_rejects_wrong_type() {
        let err = validate_args(&ProbeTool, &json!({"query": 42})).unwrap_err();
        assert!(err.to_string().contains("expected string"));
    }

    #[test]
    fn test_schema_keys_order() {
        let keys = schema_keys(&ProbeTool.parameters());
        assert_eq!(keys, vec!["query".to_string(), "maxResults".to_string()]);
    }
}
