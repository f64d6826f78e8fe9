//! Reliability Wrapper
//!
//! Every tool invocation goes through retry-with-backoff and a per-tool
//! circuit breaker. Breaker state is process-local and keyed by tool name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Tool, ToolOutput};
use crate::agent::{now_ms, AgentError, AgentResult};

/// Failure accounting for one tool name. Closed when `opened_until` is
/// absent or in the past.
#[derive(Debug, Default, Clone, Copy)]
pub struct BreakerState {
    pub failures: u32,
    pub opened_until: Option<i64>,
}

impl BreakerState {
    pub fn is_open(&self, now: i64) -> bool {
        matches!(self.opened_until, Some(until) if now < until)
    }
}

/// Executes tools with retry + breaker protection.
#[derive(Default)]
pub struct ToolExecutor {
    breakers: Mutex<HashMap<String, BreakerState>>,
}

impl ToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `tool` with the given args under its retry and breaker policies.
    ///
    /// An open breaker fails immediately without invoking the tool. On
    /// success the failure counter resets. Exhausting all retries counts
    /// one failure; reaching the threshold opens the breaker for the
    /// cooldown and resets the counter.
    pub async fn execute(&self, tool: &Arc<dyn Tool>, args: Value) -> AgentResult<ToolOutput> {
        let name = tool.name();

        {
            let breakers = self.breakers.lock().await;
            if let Some(state) = breakers.get(&name) {
                if state.is_open(now_ms()) {
                    debug!("Circuit open for '{}', rejecting call", name);
                    return Err(AgentError::CircuitOpen(name));
                }
            }
        }

        let retry = tool.retry_policy();
        let mut last_err = AgentError::Tool(format!("{}: no attempt executed", name));

        for attempt in 0..=retry.retries {
            match tool.execute(args.clone()).await {
                Ok(output) => {
                    let mut breakers = self.breakers.lock().await;
                    breakers.entry(name.clone()).or_default().failures = 0;
                    return Ok(output);
                }
                Err(e) => {
                    warn!(
                        "Tool '{}' attempt {}/{} failed: {}",
                        name,
                        attempt + 1,
                        retry.retries + 1,
                        e
                    );
                    last_err = e;
                    if attempt < retry.retries {
                        let delay = retry.base_delay_ms * 2u64.pow(attempt);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }

        let breaker = tool.breaker_policy();
        let mut breakers = self.breakers.lock().await;
        let state = breakers.entry(name.clone()).or_default();
        state.failures += 1;
        if state.failures >= breaker.failure_threshold {
            state.opened_until = Some(now_ms() + breaker.cooldown_ms as i64);
            state.failures = 0;
            warn!(
                "Circuit opened for '{}' after repeated failures ({}ms cooldown)",
                name, breaker.cooldown_ms
            );
        }

        Err(last_err)
    }

    /// Snapshot of a tool's breaker state, mainly for diagnostics.
    pub async fn breaker_state(&self, name: &str) -> BreakerState {
        self.breakers
            .lock()
            .await
            .get(name)
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{BreakerPolicy, RetryPolicy};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyTool {
        calls: AtomicUsize,
        succeed_after: usize,
        retries: u32,
        threshold: u32,
        cooldown_ms: u64,
    }

    impl FlakyTool {
        fn failing(retries: u32, threshold: u32, cooldown_ms: u64) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                succeed_after: usize::MAX,
                retries,
                threshold,
                cooldown_ms,
            }
        }
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> String {
            "flaky".to_string()
        }
        fn description(&self) -> String {
            "fails on demand".to_string()
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy {
                retries: self.retries,
                base_delay_ms: 1,
            }
        }
        fn breaker_policy(&self) -> BreakerPolicy {
            BreakerPolicy {
                failure_threshold: self.threshold,
                cooldown_ms: self.cooldown_ms,
            }
        }
        async fn execute(&self, _params: Value) -> AgentResult<ToolOutput> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n >= self.succeed_after {
                Ok(ToolOutput::success(json!({"attempt": n}), "ok"))
            } else {
                Err(AgentError::Tool("synthetic failure".to_string()))
            }
        }
    }

    #[tokio::test]
    async fn test_retry_then_success_resets_failures() {
        let tool = Arc::new(FlakyTool {
            calls: AtomicUsize::new(0),
            succeed_after: 2,
            retries: 2,
            threshold: 3,
            cooldown_ms: 10_000,
        });
        let executor = ToolExecutor::new();

        let out = executor
            .execute(&(tool.clone() as Arc<dyn Tool>), json!({}))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.breaker_state("flaky").await.failures, 0);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold() {
        let flaky = Arc::new(FlakyTool::failing(0, 2, 10_000));
        let tool = flaky.clone() as Arc<dyn Tool>;
        let executor = ToolExecutor::new();

        let e1 = executor.execute(&tool, json!({})).await.unwrap_err();
        assert!(!e1.to_string().contains("circuit_open"));
        let e2 = executor.execute(&tool, json!({})).await.unwrap_err();
        assert!(!e2.to_string().contains("circuit_open"));
        assert!(executor.breaker_state("flaky").await.opened_until.is_some());

        // Third call trips on the open breaker without touching the tool.
        let e3 = executor.execute(&tool, json!({})).await.unwrap_err();
        assert_eq!(e3.to_string(), "circuit_open:flaky");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_breaker_closes_after_cooldown() {
        let tool = Arc::new(FlakyTool::failing(0, 1, 30)) as Arc<dyn Tool>;
        let executor = ToolExecutor::new();

        executor.execute(&tool, json!({})).await.unwrap_err();
        let open = executor.execute(&tool, json!({})).await.unwrap_err();
        assert!(open.to_string().starts_with("circuit_open"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        let after = executor.execute(&tool, json!({})).await.unwrap_err();
        assert!(!after.to_string().starts_with("circuit_open"));
    }
}
