//! Argument Inference
//!
//! When planner-proposed arguments fail schema validation (or arrive as a
//! bare string), this repairs or synthesizes them: deterministic shortcuts
//! for the common tools first, an LLM round-trip as the last resort.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

use super::provider::LlmProvider;
use super::truncate;
use crate::tools::{schema_keys, Tool};

pub struct ArgumentInferencer {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl ArgumentInferencer {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Produce repaired arguments, or `None` when nothing workable can be
    /// built. Callers surface a schema-validation failure on `None`.
    pub async fn repair(
        &self,
        tool: &dyn Tool,
        args: &Value,
        task: &str,
        history: &[String],
    ) -> Option<Value> {
        if let Some(fixed) = Self::deterministic(&tool.name(), args, task, history) {
            debug!("Deterministic argument repair for '{}'", tool.name());
            return Some(fixed);
        }
        self.infer(tool, args, task, history).await
    }

    /// Shortcut repairs that need no model call.
    pub fn deterministic(
        tool_name: &str,
        args: &Value,
        task: &str,
        history: &[String],
    ) -> Option<Value> {
        match tool_name {
            "web_search" => {
                let query = args
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .unwrap_or(task);
                Some(json!({"query": query, "maxResults": 5}))
            }
            "summarize_text" => Some(json!({
                "text": truncate(&history.join("\n"), 4000),
                "instruction": "Summarize succinctly with key bullets",
            })),
            "calculator" => {
                let source = args.as_str().unwrap_or(task);
                sanitize_math(source).map(|expr| json!({"expr": expr}))
            }
            _ => None,
        }
    }

    /// Ask the model to fill the tool's argument schema.
    async fn infer(
        &self,
        tool: &dyn Tool,
        partial: &Value,
        task: &str,
        history: &[String],
    ) -> Option<Value> {
        let keys = schema_keys(&tool.parameters());
        let recent: Vec<&String> = history.iter().rev().take(6).rev().collect();
        let recent = truncate(
            &recent.iter().map(|s| s.as_str()).collect::<Vec<_>>().join("\n"),
            1200,
        );

        let prompt = format!(
            "Produce JSON arguments for the tool below.\n\
             Tool: {}\n\
             Description: {}\n\
             Expected keys: {}\n\
             Task: {}\n\
             Recent history:\n{}\n\
             Partial arguments: {}\n\
             Respond with exactly one JSON object containing the arguments and nothing else.",
            tool.name(),
            tool.description(),
            if keys.is_empty() {
                "(unspecified)".to_string()
            } else {
                keys.join(", ")
            },
            task,
            recent,
            serde_json::to_string(partial).unwrap_or_default(),
        );

        match self.provider.generate(&self.model, prompt, None).await {
            Ok(text) => extract_trailing_json(&text),
            Err(e) => {
                debug!("Argument inference call failed: {}", e);
                None
            }
        }
    }
}

/// Reduce free text to an arithmetic expression, or `None` when no
/// number-operator-number pattern survives.
///
/// Decimal points are preserved only when flanked by digits; every other
/// character outside `[-+*/^().\d\s]` is stripped and runs of whitespace
/// collapse to one space.
pub fn sanitize_math(input: &str) -> Option<String> {
    static DECIMAL: OnceLock<Regex> = OnceLock::new();
    static ACCEPT: OnceLock<Regex> = OnceLock::new();
    let decimal = DECIMAL.get_or_init(|| Regex::new(r"(\d)\.(\d)").expect("decimal regex"));
    let accept = ACCEPT.get_or_init(|| Regex::new(r"\d\s*[-+*/^]\s*\d").expect("accept regex"));

    // Protect real decimal points with a sentinel before stripping dots.
    let protected = decimal.replace_all(input, "${1}\u{1}${2}");
    let stripped: String = protected
        .chars()
        .filter(|c| matches!(c, '0'..='9' | '+' | '-' | '*' | '/' | '^' | '(' | ')' | '\u{1}') || c.is_whitespace())
        .collect();
    let restored = stripped.replace('\u{1}', ".");
    let collapsed = restored.split_whitespace().collect::<Vec<_>>().join(" ");

    if accept.is_match(&collapsed) {
        Some(collapsed)
    } else {
        None
    }
}

/// The last balanced JSON object in `text`, string- and escape-aware.
/// LLMs routinely wrap their JSON in prose; only the trailing object counts.
pub fn extract_trailing_json(text: &str) -> Option<Value> {
    let mut candidates: Vec<&str> = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        candidates.push(&text[start..=i]);
                    }
                }
            }
            _ => {}
        }
    }

    candidates
        .into_iter()
        .rev()
        .find_map(|c| serde_json::from_str(c).ok())
}
