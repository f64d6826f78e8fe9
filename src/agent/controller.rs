//! Agent Controller
//!
//! The top-level state machine driving a run: plan, request approval,
//! execute through the reliability wrapper, observe, persist. Per-step
//! errors become observation steps; only store failures abort the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use super::approval::{decide, ApprovalMode, HumanInterface};
use super::inference::ArgumentInferencer;
use super::planner::Planner;
use super::types::{
    render_history, Action, AgentError, AgentResult, Run, RunStatus, StepKind, StepRecord,
};
use super::truncate;
use crate::store::RunStore;
use crate::tools::{validate_args, Tool, ToolExecutor, ToolRegistry};

#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    pub approval_mode: ApprovalMode,
    pub max_steps: usize,
    pub top_k: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            approval_mode: ApprovalMode::default(),
            max_steps: 20,
            top_k: 8,
        }
    }
}

pub struct AgentController {
    registry: Arc<ToolRegistry>,
    planner: Planner,
    inferencer: ArgumentInferencer,
    store: Arc<RunStore>,
    executor: ToolExecutor,
    human: Arc<dyn HumanInterface>,
    config: ControllerConfig,
    interrupt: Arc<AtomicBool>,
}

impl AgentController {
    pub fn new(
        registry: Arc<ToolRegistry>,
        planner: Planner,
        inferencer: ArgumentInferencer,
        store: Arc<RunStore>,
        human: Arc<dyn HumanInterface>,
    ) -> Self {
        Self {
            registry,
            planner,
            inferencer,
            store,
            executor: ToolExecutor::new(),
            human,
            config: ControllerConfig::default(),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Cooperative stop flag; checked at the top of every loop iteration.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Start a fresh run for a task and drive it.
    pub async fn execute_task(&self, task: &str) -> AgentResult<Run> {
        let mut run = self.store.create(task).await?;
        self.drive(&mut run).await?;
        Ok(run)
    }

    /// Resume a paused or running run from its persisted trajectory.
    pub async fn resume(&self, run_id: &str) -> AgentResult<Run> {
        let mut run = self.store.load(run_id).await?;
        if !run.is_resumable() {
            return Err(AgentError::Store(format!(
                "run {} is {:?} and cannot be resumed",
                run_id,
                run.status
            )));
        }
        info!("Resuming run {} with {} prior steps", run_id, run.steps.len());
        self.drive(&mut run).await?;
        Ok(run)
    }

    /// Drive a run for up to `max_steps` further steps. Store failures
    /// mark the run failed and propagate.
    pub async fn drive(&self, run: &mut Run) -> AgentResult<RunStatus> {
        match self.drive_inner(run).await {
            Ok(status) => Ok(status),
            Err(e) => {
                warn!("Run {} failed: {}", run.run_id, e);
                run.status = RunStatus::Failed;
                let _ = self.store.save(run).await;
                Err(e)
            }
        }
    }

    async fn drive_inner(&self, run: &mut Run) -> AgentResult<RunStatus> {
        self.store.set_status(run, RunStatus::Running).await?;
        self.registry.smart_preload(&run.task, "").await;

        let mut history = render_history(&run.steps);
        let mut step_num = run
            .steps
            .iter()
            .filter(|s| s.kind == StepKind::Thought)
            .count();

        for _ in 0..self.config.max_steps {
            if self.interrupt.load(Ordering::SeqCst) {
                return self.pause(run, "interrupted").await;
            }

            step_num += 1;
            let task = run.task.clone();
            let action = match self
                .planner
                .propose(&task, &history, self.config.top_k)
                .await
            {
                Ok(action) => action,
                Err(e) => {
                    self.observe_error(run, &mut history, &e.to_string()).await?;
                    continue;
                }
            };

            self.append_thought(run, step_num, &action).await?;

            match action {
                Action::FinalAnswer { output, .. } => {
                    self.append(run, StepKind::Final, json!({"output": output}))
                        .await?;
                    self.store.set_status(run, RunStatus::Done).await?;
                    info!("Run {} done after {} steps", run.run_id, step_num);
                    return Ok(RunStatus::Done);
                }
                Action::AskHuman { question, .. } => {
                    if self.config.approval_mode == ApprovalMode::Always {
                        let summary = format!("ask_human({})", truncate(&question, 50));
                        if !self.seek_approval(run, &summary, false).await? {
                            return self.pause(run, "approval_denied").await;
                        }
                    }
                    let answer = self.human.ask(&question).await?;
                    self.append(run, StepKind::Observation, json!({"human": answer}))
                        .await?;
                    history.push(format!("Human: {}", answer));
                }
                Action::UseTool {
                    tool_name, args, ..
                } => {
                    let tool = match self.registry.get_or_load(&tool_name).await {
                        Ok(tool) => tool,
                        Err(e) => {
                            // Planner error; record it and keep looping.
                            self.observe_error(run, &mut history, &e.to_string()).await?;
                            continue;
                        }
                    };

                    let args = self.repair_args(&tool, args, &task, &history).await;

                    let args_text = serde_json::to_string(&args).unwrap_or_default();
                    let summary = format!("{}({})", tool_name, truncate(&args_text, 50));
                    let approved = match decide(self.config.approval_mode, tool.sensitive()) {
                        Some(approved) => {
                            self.record_approval(run, &summary, tool.sensitive(), approved)
                                .await?;
                            approved
                        }
                        None => self.seek_approval(run, &summary, tool.sensitive()).await?,
                    };
                    if !approved {
                        return self.pause(run, "approval_denied").await;
                    }

                    if let Err(e) = validate_args(tool.as_ref(), &args) {
                        self.observe_error(run, &mut history, &e.to_string()).await?;
                        continue;
                    }

                    self.append(
                        run,
                        StepKind::Tool,
                        json!({"tool": tool_name, "args": args}),
                    )
                    .await?;
                    history.push(format!("Used {} with {}", tool_name, args_text));

                    let observation = match self.executor.execute(&tool, args).await {
                        Ok(output) if output.success => {
                            json!({"result": output.data, "summary": output.summary})
                        }
                        Ok(output) => json!({"error": output.summary}),
                        Err(e) => json!({"error": e.to_string()}),
                    };
                    self.append(run, StepKind::Observation, observation.clone())
                        .await?;
                    history.push(format!(
                        "Observed: {}",
                        serde_json::to_string(&observation).unwrap_or_default()
                    ));
                }
            }
        }

        self.pause(run, "max_steps").await
    }

    /// Validate and, when needed, repair the proposed arguments. Returns
    /// the best arguments available; final validation happens at the call
    /// site so a hopeless repair still surfaces as a schema failure.
    async fn repair_args(
        &self,
        tool: &Arc<dyn Tool>,
        args: Value,
        task: &str,
        history: &[String],
    ) -> Value {
        if validate_args(tool.as_ref(), &args).is_ok() {
            return args;
        }
        match self
            .inferencer
            .repair(tool.as_ref(), &args, task, history)
            .await
        {
            Some(fixed) => fixed,
            None => args,
        }
    }

    async fn append_thought(
        &self,
        run: &mut Run,
        step_num: usize,
        action: &Action,
    ) -> AgentResult<StepRecord> {
        let mut data = json!({
            "step": step_num,
            "actionType": action.kind(),
        });
        if let Action::UseTool {
            tool_name,
            rationale,
            ..
        } = action
        {
            data["tool"] = json!(tool_name);
            data["rationale"] = json!(rationale);
        } else {
            let rationale = match action {
                Action::AskHuman { rationale, .. } | Action::FinalAnswer { rationale, .. } => {
                    rationale
                }
                Action::UseTool { .. } => unreachable!(),
            };
            data["rationale"] = json!(rationale);
        }
        self.append(run, StepKind::Thought, data).await
    }

    /// Record an approval-request / approval-response pair for a decision
    /// made by policy alone.
    async fn record_approval(
        &self,
        run: &mut Run,
        summary: &str,
        sensitive: bool,
        approved: bool,
    ) -> AgentResult<()> {
        self.append(
            run,
            StepKind::ApprovalRequest,
            json!({"summary": summary, "sensitive": sensitive}),
        )
        .await?;
        self.append(
            run,
            StepKind::ApprovalResponse,
            json!({"approved": approved}),
        )
        .await?;
        Ok(())
    }

    /// Ask the human and record both sides of the exchange.
    async fn seek_approval(
        &self,
        run: &mut Run,
        summary: &str,
        sensitive: bool,
    ) -> AgentResult<bool> {
        self.append(
            run,
            StepKind::ApprovalRequest,
            json!({"summary": summary, "sensitive": sensitive}),
        )
        .await?;
        let approved = self.human.confirm(summary).await?;
        self.append(
            run,
            StepKind::ApprovalResponse,
            json!({"approved": approved}),
        )
        .await?;
        if !approved {
            info!("Human denied: {}", summary);
        }
        Ok(approved)
    }

    async fn observe_error(
        &self,
        run: &mut Run,
        history: &mut Vec<String>,
        message: &str,
    ) -> AgentResult<()> {
        let data = json!({"error": message});
        self.append(run, StepKind::Observation, data.clone()).await?;
        history.push(format!(
            "Observed: {}",
            serde_json::to_string(&data).unwrap_or_default()
        ));
        Ok(())
    }

    async fn pause(&self, run: &mut Run, reason: &str) -> AgentResult<RunStatus> {
        self.append(run, StepKind::Interruption, json!({"reason": reason}))
            .await?;
        self.store.set_status(run, RunStatus::Paused).await?;
        info!("Run {} paused ({})", run.run_id, reason);
        Ok(RunStatus::Paused)
    }

    async fn append(
        &self,
        run: &mut Run,
        kind: StepKind,
        data: Value,
    ) -> AgentResult<StepRecord> {
        self.store.append_step(run, kind, data).await
    }
}
