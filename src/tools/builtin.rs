//! Built-in Tools
//!
//! The core tool set registered eagerly at startup: arithmetic, web
//! search, LLM-backed summarization, file reading and the clock. All are
//! category `core` so the cache sweep never drops them.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::{Tool, ToolOutput};
use crate::agent::provider::LlmProvider;
use crate::agent::{AgentError, AgentResult};

const CORE: &str = "core";

// ---------------------------------------------------------------------------
// calculator
// ---------------------------------------------------------------------------

/// Evaluates arithmetic expressions over `+ - * / ^` with parentheses.
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> String {
        "calculator".to_string()
    }

    fn description(&self) -> String {
        "Evaluate an arithmetic expression with +, -, *, /, ^ and parentheses.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expr": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. '2*(3+4)/5'."
                }
            },
            "required": ["expr"]
        })
    }

    fn categories(&self) -> Vec<String> {
        vec![CORE.to_string(), "math".to_string()]
    }

    fn priority(&self) -> u8 {
        80
    }

    async fn execute(&self, params: Value) -> AgentResult<ToolOutput> {
        let expr = params["expr"]
            .as_str()
            .ok_or_else(|| AgentError::Tool("Missing 'expr' argument".to_string()))?;
        let value = eval_expression(expr)
            .map_err(|e| AgentError::Tool(format!("cannot evaluate '{}': {}", expr, e)))?;
        Ok(ToolOutput::success(
            json!({"value": value}),
            format!("{} = {}", expr, value),
        ))
    }
}

/// Recursive-descent evaluation. `^` binds tightest and is
/// right-associative; division by zero is an error.
pub fn eval_expression(input: &str) -> Result<f64, String> {
    let tokens: Vec<char> = input.chars().filter(|c| !c.is_whitespace()).collect();
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = ExprParser { tokens, pos: 0 };
    let value = parser.parse_sum()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!("unexpected '{}'", parser.tokens[parser.pos]));
    }
    if !value.is_finite() {
        return Err("result is not finite".to_string());
    }
    Ok(value)
}

struct ExprParser {
    tokens: Vec<char>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<char> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn parse_sum(&mut self) -> Result<f64, String> {
        let mut left = self.parse_product()?;
        while let Some(op) = self.peek() {
            match op {
                '+' => {
                    self.bump();
                    left += self.parse_product()?;
                }
                '-' => {
                    self.bump();
                    left -= self.parse_product()?;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<f64, String> {
        let mut left = self.parse_power()?;
        while let Some(op) = self.peek() {
            match op {
                '*' => {
                    self.bump();
                    left *= self.parse_power()?;
                }
                '/' => {
                    self.bump();
                    let right = self.parse_power()?;
                    if right == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    left /= right;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_power(&mut self) -> Result<f64, String> {
        let base = self.parse_atom()?;
        if self.peek() == Some('^') {
            self.bump();
            let exponent = self.parse_power()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn parse_atom(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some('(') => {
                self.bump();
                let inner = self.parse_sum()?;
                if self.bump() != Some(')') {
                    return Err("missing closing parenthesis".to_string());
                }
                Ok(inner)
            }
            Some('-') => {
                self.bump();
                Ok(-self.parse_atom()?)
            }
            Some('+') => {
                self.bump();
                self.parse_atom()
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.parse_number(),
            Some(c) => Err(format!("unexpected '{}'", c)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn parse_number(&mut self) -> Result<f64, String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.bump();
        }
        let text: String = self.tokens[start..self.pos].iter().collect();
        text.parse::<f64>().map_err(|_| format!("bad number '{}'", text))
    }
}

// ---------------------------------------------------------------------------
// web_search
// ---------------------------------------------------------------------------

/// Web lookups through the DuckDuckGo instant-answer API.
pub struct WebSearchTool {
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> String {
        "web_search".to_string()
    }

    fn description(&self) -> String {
        "Search the web for current information. Returns result titles, snippets and URLs."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "The search query."},
                "maxResults": {"type": "integer", "description": "Upper bound on results."}
            },
            "required": ["query"]
        })
    }

    fn categories(&self) -> Vec<String> {
        vec![CORE.to_string(), "web".to_string()]
    }

    fn priority(&self) -> u8 {
        70
    }

    async fn execute(&self, params: Value) -> AgentResult<ToolOutput> {
        let query = params["query"]
            .as_str()
            .ok_or_else(|| AgentError::Tool("Missing 'query' argument".to_string()))?;
        let max_results = params["maxResults"].as_u64().unwrap_or(5) as usize;

        debug!("web_search: '{}' (max {})", query, max_results);
        let response = self
            .client
            .get("https://api.duckduckgo.com/")
            .query(&[("q", query), ("format", "json"), ("no_html", "1")])
            .send()
            .await
            .map_err(|e| AgentError::Tool(format!("search request: {}", e)))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Tool(format!("search response: {}", e)))?;

        let mut results = Vec::new();
        if let Some(abstract_text) = body["AbstractText"].as_str() {
            if !abstract_text.is_empty() {
                results.push(json!({
                    "title": body["Heading"].as_str().unwrap_or(query),
                    "snippet": abstract_text,
                    "url": body["AbstractURL"].as_str().unwrap_or(""),
                }));
            }
        }
        if let Some(topics) = body["RelatedTopics"].as_array() {
            for topic in topics {
                if results.len() >= max_results {
                    break;
                }
                if let Some(text) = topic["Text"].as_str() {
                    results.push(json!({
                        "title": text.split(" - ").next().unwrap_or(text),
                        "snippet": text,
                        "url": topic["FirstURL"].as_str().unwrap_or(""),
                    }));
                }
            }
        }
        results.truncate(max_results);

        let summary = if results.is_empty() {
            format!("No results for '{}'", query)
        } else {
            format!("{} results for '{}'", results.len(), query)
        };
        Ok(ToolOutput::success(json!({"results": results}), summary))
    }
}

// ---------------------------------------------------------------------------
// summarize_text
// ---------------------------------------------------------------------------

/// LLM-backed summarization through the configured provider.
pub struct SummarizeTool {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl SummarizeTool {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Tool for SummarizeTool {
    fn name(&self) -> String {
        "summarize_text".to_string()
    }

    fn description(&self) -> String {
        "Summarize a block of text, optionally following a custom instruction.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "The text to summarize."},
                "instruction": {"type": "string", "description": "Optional summarization instruction."}
            },
            "required": ["text"]
        })
    }

    fn categories(&self) -> Vec<String> {
        vec![CORE.to_string(), "text".to_string()]
    }

    async fn execute(&self, params: Value) -> AgentResult<ToolOutput> {
        let text = params["text"]
            .as_str()
            .ok_or_else(|| AgentError::Tool("Missing 'text' argument".to_string()))?;
        let instruction = params["instruction"]
            .as_str()
            .unwrap_or("Summarize succinctly with key bullets");

        let prompt = format!("{}\n\n---\n{}", instruction, text);
        let summary = self
            .provider
            .generate(&self.model, prompt, None)
            .await
            .map_err(|e| AgentError::Tool(format!("summarization failed: {}", e)))?;
        let summary = summary.trim().to_string();

        Ok(ToolOutput::success(json!({"summary": summary}), summary.clone()))
    }
}

// ---------------------------------------------------------------------------
// read_file
// ---------------------------------------------------------------------------

/// Reads a UTF-8 file from disk. Sensitive: requires approval in
/// `sensitive` mode.
pub struct FileReadTool;

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> String {
        "read_file".to_string()
    }

    fn description(&self) -> String {
        "Read a UTF-8 text file from the local filesystem.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path of the file to read."}
            },
            "required": ["path"]
        })
    }

    fn sensitive(&self) -> bool {
        true
    }

    fn categories(&self) -> Vec<String> {
        vec![CORE.to_string(), "filesystem".to_string()]
    }

    async fn execute(&self, params: Value) -> AgentResult<ToolOutput> {
        let path = params["path"]
            .as_str()
            .ok_or_else(|| AgentError::Tool("Missing 'path' argument".to_string()))?;
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AgentError::Tool(format!("read {}: {}", path, e)))?;
        let preview = crate::agent::truncate(&content, 200);
        Ok(ToolOutput::success(
            json!({"path": path, "content": content}),
            format!("Read {} ({} bytes): {}", path, content.len(), preview),
        ))
    }
}

// ---------------------------------------------------------------------------
// current_time
// ---------------------------------------------------------------------------

/// UTC clock.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> String {
        "current_time".to_string()
    }

    fn description(&self) -> String {
        "Get the current UTC date and time.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn categories(&self) -> Vec<String> {
        vec![CORE.to_string()]
    }

    async fn execute(&self, _params: Value) -> AgentResult<ToolOutput> {
        let now = chrono::Utc::now();
        Ok(ToolOutput::success(
            json!({"iso": now.to_rfc3339(), "unix_ms": now.timestamp_millis()}),
            now.to_rfc3339(),
        ))
    }
}
