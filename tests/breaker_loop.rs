//! Circuit breaker behavior observed through the full run loop.
//!
//! Run with: cargo test --test breaker_loop

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use common::{registry_with_loader, MockHuman, ScriptedProvider};
use steward::agent::{
    AgentController, AgentResult, ApprovalMode, ArgumentInferencer, ControllerConfig, Planner,
    RunStatus, StepKind,
};
use steward::store::RunStore;
use steward::tools::{BreakerPolicy, RetryPolicy, Tool, ToolOutput};

/// Always fails; breaker trips after two exhausted executions.
struct DoomedTool {
    runs: AtomicUsize,
}

#[async_trait]
impl Tool for DoomedTool {
    fn name(&self) -> String {
        "doomed".to_string()
    }

    fn description(&self) -> String {
        "A tool that always fails".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"n": {"type": "integer"}},
            "required": ["n"]
        })
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: 0,
            base_delay_ms: 1,
        }
    }

    fn breaker_policy(&self) -> BreakerPolicy {
        BreakerPolicy {
            failure_threshold: 2,
            cooldown_ms: 10_000,
        }
    }

    async fn execute(&self, _params: Value) -> AgentResult<ToolOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Err(steward::agent::AgentError::Tool("synthetic failure".to_string()))
    }
}

#[tokio::test]
async fn test_breaker_opens_inside_run_loop() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (registry, _, _) = registry_with_loader(dir.path());
    let doomed = Arc::new(DoomedTool {
        runs: AtomicUsize::new(0),
    });
    registry.register(doomed.clone()).await?;
    let store = RunStore::new(dir.path())?;

    // Three distinct calls so none is deduplicated, then a wrap-up.
    let provider = Arc::new(ScriptedProvider::new(vec![
        r#"{"type": "use_tool", "tool_name": "doomed", "args": {"n": 1}, "rationale": "first try"}"#,
        r#"{"type": "use_tool", "tool_name": "doomed", "args": {"n": 2}, "rationale": "second try"}"#,
        r#"{"type": "use_tool", "tool_name": "doomed", "args": {"n": 3}, "rationale": "third try"}"#,
        r#"{"type": "final_answer", "output": "the tool is unavailable", "rationale": "giving up"}"#,
    ]));

    let planner = Planner::new(registry.clone(), provider.clone(), "test-model");
    let inferencer = ArgumentInferencer::new(provider, "test-model");
    let agent = AgentController::new(
        registry,
        planner,
        inferencer,
        store,
        Arc::new(MockHuman::approving()),
    )
    .with_config(ControllerConfig {
        approval_mode: ApprovalMode::Auto,
        max_steps: 10,
        top_k: 8,
    });

    let run = agent.execute_task("exercise the doomed tool").await?;
    assert_eq!(run.status, RunStatus::Done);

    let errors: Vec<String> = run
        .steps
        .iter()
        .filter(|s| s.kind == StepKind::Observation)
        .filter_map(|s| s.data["error"].as_str().map(|e| e.to_string()))
        .collect();
    assert_eq!(errors.len(), 3);
    assert!(errors[0].contains("synthetic failure"));
    assert!(errors[1].contains("synthetic failure"));
    assert_eq!(errors[2], "circuit_open:doomed");

    // The third call never reached the tool.
    assert_eq!(doomed.runs.load(Ordering::SeqCst), 2);
    Ok(())
}
