//! Shared test doubles for the tools modules.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::embedding::Embedder;
use super::{Tool, ToolOutput};
use crate::agent::AgentResult;

/// Deterministic embedder: hashes each text into a unit vector and counts
/// provider calls.
pub struct StubEmbedder {
    pub calls: AtomicUsize,
}

impl StubEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        for (i, b) in text.bytes().enumerate() {
            v[i % 8] += b as f32;
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
        8
    }

    async fn embed(&self, texts: &[String]) -> AgentResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }
}

/// Trivial tool that echoes its arguments back.
pub struct EchoTool {
    pub tool_name: String,
}

impl EchoTool {
    pub fn named(name: &str) -> Self {
        Self {
            tool_name: name.to_string(),
        }
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> String {
        self.tool_name.clone()
    }

    fn description(&self) -> String {
        format!("Echo tool {}", self.tool_name)
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, params: Value) -> AgentResult<ToolOutput> {
        Ok(ToolOutput::success(params, "echo"))
    }
}
