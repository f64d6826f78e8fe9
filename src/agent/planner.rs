//! Planner
//!
//! Produces the next action for a task given the history so far. Cheap
//! deterministic heuristics short-circuit the common cases; the LLM is the
//! fallback, not the first resort. A proposal identical to an action
//! already in history is treated as satisfied and the ladder advances.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::inference::{extract_trailing_json, sanitize_math};
use super::provider::LlmProvider;
use super::types::{Action, AgentResult};
use super::truncate;
use crate::tools::{schema_keys, Tool, ToolRegistry};

const GUIDANCE_QUESTION: &str =
    "I need more specific guidance to continue. Could you clarify the goal or provide more detail?";

const INFO_KEYWORDS: &[&str] = &[
    "find", "search", "who is", "what is", "current", "latest", "version", "look up", "news",
    "price",
];

const WEB_KEYWORDS: &[&str] = &[
    "search", "find", "look up", "google", "web", "current", "latest", "version",
];

pub struct Planner {
    registry: Arc<ToolRegistry>,
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl Planner {
    pub fn new(
        registry: Arc<ToolRegistry>,
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            provider,
            model: model.into(),
        }
    }

    /// The planning pipeline: candidate retrieval, intelligent fallback,
    /// task heuristics, LLM step, then a clarification request.
    pub async fn propose(&self, task: &str, history: &[String], k: usize) -> AgentResult<Action> {
        let query = Self::build_query(task, history);
        let candidates = match self.registry.search(&query, k.max(15)).await {
            Ok(tools) => tools,
            Err(e) => {
                warn!("Candidate retrieval failed, planning without it: {}", e);
                Vec::new()
            }
        };

        // Warm likely neighbors in the background; never blocks planning.
        let returned: Vec<String> = candidates.iter().map(|t| t.name()).collect();
        let registry = self.registry.clone();
        let preload_query = query.clone();
        tokio::spawn(async move {
            registry.preload_similar(&preload_query, &returned).await;
        });

        if let Some(action) = Self::intelligent_fallback(task, history) {
            debug!("Planner: intelligent fallback -> {}", action.kind());
            return Ok(action);
        }

        if let Some(action) = Self::heuristic_fallback(task, history) {
            debug!("Planner: heuristic fallback -> {}", action.kind());
            return Ok(action);
        }

        match self.llm_step(task, history, &candidates).await {
            Ok(Some(action)) => {
                debug!("Planner: LLM step -> {}", action.kind());
                return Ok(action);
            }
            Ok(None) => debug!("Planner: LLM step produced nothing usable"),
            Err(e) => warn!("Planner: LLM step failed: {}", e),
        }

        // One more pass over the cheap rules before giving up.
        if let Some(action) = Self::intelligent_fallback(task, history) {
            return Ok(action);
        }

        Ok(Action::AskHuman {
            question: GUIDANCE_QUESTION.to_string(),
            rationale: "no heuristic applied and the model gave no usable action".to_string(),
        })
    }

    /// Search query: task plus the tail of the history, bounded.
    fn build_query(task: &str, history: &[String]) -> String {
        let tail: Vec<&str> = history
            .iter()
            .rev()
            .take(3)
            .rev()
            .map(|s| s.as_str())
            .collect();
        truncate(&format!("{} {}", task, tail.join(" ")), 500)
    }

    /// True when an identical tool call (string-equal JSON args) already
    /// happened.
    fn already_used(history: &[String], tool: &str, args: &Value) -> bool {
        let line = format!(
            "Used {} with {}",
            tool,
            serde_json::to_string(args).unwrap_or_default()
        );
        history.iter().any(|h| h == &line)
    }

    /// Progress-aware rules over the trajectory: finish when a summary
    /// exists, summarize gathered results, avoid endless searching.
    pub(crate) fn intelligent_fallback(task: &str, history: &[String]) -> Option<Action> {
        let task_lower = task.to_lowercase();

        // A completed summarization is the answer.
        if let Some(summary) = Self::last_summary(history) {
            return Some(Action::FinalAnswer {
                output: summary,
                rationale: "a summary of the gathered material is already available".to_string(),
            });
        }

        let searches = history
            .iter()
            .filter(|h| h.starts_with("Used web_search with "))
            .count();
        let snippets = Self::gathered_snippets(history);
        let summarize_used = history.iter().any(|h| h.starts_with("Used summarize_text with "));

        // Explicit summarization intent over gathered search results.
        if (task_lower.contains("summar")
            || task_lower.contains("brief")
            || task_lower.contains("bullet"))
            && !snippets.is_empty()
            && !summarize_used
        {
            let args = json!({"text": snippets, "instruction": task});
            if !Self::already_used(history, "summarize_text", &args) {
                return Some(Action::UseTool {
                    tool_name: "summarize_text".to_string(),
                    args,
                    rationale: "the task asks for a summary of the gathered results".to_string(),
                });
            }
        }

        // Enough searching; close out from what was gathered.
        if searches >= 3 && !snippets.is_empty() && !summarize_used {
            return Some(Action::FinalAnswer {
                output: truncate(&snippets, 500),
                rationale: "several searches produced material; answering from it".to_string(),
            });
        }

        // Information-gathering intent with little searching done yet.
        if INFO_KEYWORDS.iter().any(|kw| task_lower.contains(kw)) && searches < 2 {
            let args = json!({"query": task, "maxResults": 5});
            if !Self::already_used(history, "web_search", &args) {
                return Some(Action::UseTool {
                    tool_name: "web_search".to_string(),
                    args,
                    rationale: "the task asks for information to be looked up".to_string(),
                });
            }
        }

        None
    }

    /// Shape-of-the-task heuristics: comparisons, plain arithmetic, web
    /// lookups, file reading.
    pub(crate) fn heuristic_fallback(task: &str, history: &[String]) -> Option<Action> {
        if let Some(action) = Self::comparison(task, history) {
            return Some(action);
        }

        if let Some(expr) = sanitize_math(task) {
            let args = json!({"expr": expr});
            if !Self::already_used(history, "calculator", &args) {
                return Some(Action::UseTool {
                    tool_name: "calculator".to_string(),
                    args,
                    rationale: "the task contains an arithmetic expression".to_string(),
                });
            }
            if let Some(value) = Self::observed_calc_value(history, &expr) {
                return Some(Action::FinalAnswer {
                    output: format!("{} = {}", expr, value),
                    rationale: "the expression has been evaluated".to_string(),
                });
            }
        }

        let task_lower = task.to_lowercase();
        if WEB_KEYWORDS.iter().any(|kw| task_lower.contains(kw)) {
            let args = json!({"query": task, "maxResults": 5});
            if !Self::already_used(history, "web_search", &args) {
                return Some(Action::UseTool {
                    tool_name: "web_search".to_string(),
                    args,
                    rationale: "the task reads like a web lookup".to_string(),
                });
            }
        }

        if task_lower.contains("file") && (task_lower.contains("read") || task_lower.contains("open"))
        {
            return Some(Action::AskHuman {
                question: "Which file should I read? Please provide the full path.".to_string(),
                rationale: "the task mentions a file but no usable path".to_string(),
            });
        }

        None
    }

    /// `X vs Y` comparisons: evaluate each side through the calculator,
    /// then verbalize the relation.
    fn comparison(task: &str, history: &[String]) -> Option<Action> {
        static VS: OnceLock<Regex> = OnceLock::new();
        let vs = VS.get_or_init(|| Regex::new(r"(?i)\b(?:vs|versus)\b").expect("vs regex"));

        let m = vs.find(task)?;
        let left = sanitize_math(&task[..m.start()])?;
        let right = sanitize_math(&task[m.end()..])?;

        for expr in [&left, &right] {
            let args = json!({"expr": expr});
            if !Self::already_used(history, "calculator", &args) {
                return Some(Action::UseTool {
                    tool_name: "calculator".to_string(),
                    args,
                    rationale: format!("evaluating one side of the comparison: {}", expr),
                });
            }
        }

        let left_value = Self::observed_calc_value(history, &left)?;
        let right_value = Self::observed_calc_value(history, &right)?;
        let relation = if left_value < right_value {
            "less than"
        } else if left_value > right_value {
            "greater than"
        } else {
            "equal to"
        };
        Some(Action::FinalAnswer {
            output: format!(
                "{} = {} vs {} = {} ⇒ {} is {} {}",
                left, left_value, right, right_value, left, relation, right
            ),
            rationale: "both sides of the comparison have been evaluated".to_string(),
        })
    }

    /// The observed calculator result for an exact expression, if any.
    fn observed_calc_value(history: &[String], expr: &str) -> Option<f64> {
        let used = format!(
            "Used calculator with {}",
            serde_json::to_string(&json!({"expr": expr})).unwrap_or_default()
        );
        for (i, line) in history.iter().enumerate() {
            if line == &used {
                let observed = history.get(i + 1)?.strip_prefix("Observed: ")?;
                let value: Value = serde_json::from_str(observed).ok()?;
                return value["result"]["value"].as_f64();
            }
        }
        None
    }

    /// The most recent non-empty summarize_text output.
    fn last_summary(history: &[String]) -> Option<String> {
        for (i, line) in history.iter().enumerate().rev() {
            if line.starts_with("Used summarize_text with ") {
                let observed = history.get(i + 1)?.strip_prefix("Observed: ")?;
                let value: Value = serde_json::from_str(observed).ok()?;
                let summary = value["result"]["summary"].as_str()?;
                if !summary.trim().is_empty() {
                    return Some(summary.to_string());
                }
            }
        }
        None
    }

    /// Snippets from every observed web_search result, concatenated.
    fn gathered_snippets(history: &[String]) -> String {
        let mut parts = Vec::new();
        for (i, line) in history.iter().enumerate() {
            if !line.starts_with("Used web_search with ") {
                continue;
            }
            let Some(observed) = history.get(i + 1).and_then(|l| l.strip_prefix("Observed: "))
            else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<Value>(observed) else {
                continue;
            };
            if let Some(results) = value["result"]["results"].as_array() {
                for result in results {
                    if let Some(snippet) = result["snippet"].as_str() {
                        parts.push(snippet.to_string());
                    }
                }
            }
        }
        parts.join("\n")
    }

    /// ReAct-style LLM step: task, recent history and the candidate
    /// catalog in, exactly one JSON action out.
    async fn llm_step(
        &self,
        task: &str,
        history: &[String],
        candidates: &[Arc<dyn Tool>],
    ) -> AgentResult<Option<Action>> {
        let catalog: String = candidates
            .iter()
            .map(|t| {
                format!(
                    "- {}: {} (args: {})",
                    t.name(),
                    t.description(),
                    schema_keys(&t.parameters()).join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let joined = history.join("\n");
        let recent = if joined.len() > 1500 {
            let mut start = joined.len() - 1500;
            while !joined.is_char_boundary(start) {
                start += 1;
            }
            &joined[start..]
        } else {
            joined.as_str()
        };

        let prompt = format!(
            "You are an autonomous agent deciding the single next step for a task.\n\
             \n\
             Task: {}\n\
             \n\
             History so far:\n{}\n\
             \n\
             Available tools:\n{}\n\
             \n\
             Decide the next action. Respond with exactly one JSON object, nothing else:\n\
             {{\"type\": \"use_tool\", \"tool_name\": \"...\", \"args\": {{...}}, \"rationale\": \"...\"}}\n\
             or {{\"type\": \"ask_human\", \"question\": \"...\", \"rationale\": \"...\"}}\n\
             or {{\"type\": \"final_answer\", \"output\": \"...\", \"rationale\": \"...\"}}",
            task,
            if recent.is_empty() { "(none)" } else { recent },
            if catalog.is_empty() { "(none)" } else { catalog.as_str() },
        );

        let completion = self.provider.generate(&self.model, prompt, None).await?;
        let Some(raw) = extract_trailing_json(&completion) else {
            return Ok(None);
        };
        let Ok(action) = serde_json::from_value::<Action>(raw) else {
            return Ok(None);
        };

        if let Action::UseTool {
            ref tool_name,
            ref args,
            ..
        } = action
        {
            // The proposed tool must exist, and the exact call must be new.
            if self.registry.get_or_load(tool_name).await.is_err() {
                warn!("LLM proposed unknown tool '{}'", tool_name);
                return Ok(None);
            }
            if Self::already_used(history, tool_name, args) {
                debug!("LLM repeated an already-satisfied call to '{}'", tool_name);
                return Ok(None);
            }
        }
        Ok(Some(action))
    }
}
