//! Core Data Model
//!
//! Actions, steps, runs and the error taxonomy shared by the planner,
//! the controller and the run store.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Result alias used across the agent core.
pub type AgentResult<T> = Result<T, AgentError>;

/// Error taxonomy. Per-step errors are captured as observation steps and
/// never leave the run loop; only `Store` aborts a run.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("planner error: {0}")]
    Planner(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("schema validation failed for '{tool}': {reason}")]
    SchemaValidation { tool: String, reason: String },

    #[error("tool error: {0}")]
    Tool(String),

    #[error("circuit_open:{0}")]
    CircuitOpen(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("interrupted")]
    Interrupted,
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::Store(e.to_string())
    }
}

/// The planner's decision for the next step. Exactly one variant per step;
/// the controller matches exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    UseTool {
        tool_name: String,
        args: Value,
        #[serde(default)]
        rationale: String,
    },
    AskHuman {
        question: String,
        #[serde(default)]
        rationale: String,
    },
    FinalAnswer {
        output: String,
        #[serde(default)]
        rationale: String,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::UseTool { .. } => "use_tool",
            Action::AskHuman { .. } => "ask_human",
            Action::FinalAnswer { .. } => "final_answer",
        }
    }
}

/// Kind of a trajectory step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    Thought,
    Tool,
    Observation,
    Final,
    ApprovalRequest,
    ApprovalResponse,
    Interruption,
}

/// One atomic entry in a run's trajectory. Append-only; `ts` is clamped
/// monotonically non-decreasing within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: String,
    pub run_id: String,
    pub kind: StepKind,
    pub ts: i64,
    pub data: Value,
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Done,
    Failed,
}

/// A single task execution with its append-only step log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub task: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub status: RunStatus,
    pub steps: Vec<StepRecord>,
}

impl Run {
    pub fn new(task: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            run_id: Uuid::new_v4().to_string(),
            task: task.into(),
            created_at: now,
            updated_at: now,
            status: RunStatus::Running,
            steps: Vec::new(),
        }
    }

    /// True when the run may still be driven forward.
    pub fn is_resumable(&self) -> bool {
        matches!(self.status, RunStatus::Running | RunStatus::Paused)
    }

    pub fn make_step(&self, kind: StepKind, data: Value) -> StepRecord {
        let last_ts = self.steps.last().map(|s| s.ts).unwrap_or(self.created_at);
        StepRecord {
            id: Uuid::new_v4().to_string(),
            run_id: self.run_id.clone(),
            kind,
            // Clamp so step timestamps never go backwards within a run.
            ts: now_ms().max(last_ts),
            data,
        }
    }
}

/// Milliseconds since the epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Readable projection of past steps handed to the planner.
///
/// Tool steps render as `Used T with A`, observations as `Observed: …`
/// (human answers as `Human: …`), finals as `Final: …`.
pub fn render_history(steps: &[StepRecord]) -> Vec<String> {
    let mut lines = Vec::new();
    for step in steps {
        match step.kind {
            StepKind::Tool => {
                let tool = step.data["tool"].as_str().unwrap_or("?");
                let args = serde_json::to_string(&step.data["args"]).unwrap_or_default();
                lines.push(format!("Used {} with {}", tool, args));
            }
            StepKind::Observation => {
                if let Some(answer) = step.data["human"].as_str() {
                    lines.push(format!("Human: {}", answer));
                } else {
                    let body = serde_json::to_string(&step.data).unwrap_or_default();
                    lines.push(format!("Observed: {}", body));
                }
            }
            StepKind::Final => {
                let output = step.data["output"].as_str().unwrap_or("");
                lines.push(format!("Final: {}", output));
            }
            _ => {}
        }
    }
    lines
}
