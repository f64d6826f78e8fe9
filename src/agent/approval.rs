//! Approval Policy
//!
//! Pure approval decision plus the interactive channel used when a human
//! has to be asked. Every interaction is recorded in the trajectory by the
//! controller, regardless of outcome.

use std::io::Write;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{AgentError, AgentResult};

/// When tool executions require a human sign-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Approve everything.
    Auto,
    /// Approve unless the tool is flagged sensitive.
    Sensitive,
    /// Ask the human for every action.
    Always,
}

impl Default for ApprovalMode {
    fn default() -> Self {
        ApprovalMode::Sensitive
    }
}

impl FromStr for ApprovalMode {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ApprovalMode::Auto),
            "sensitive" => Ok(ApprovalMode::Sensitive),
            "always" => Ok(ApprovalMode::Always),
            other => Err(AgentError::Planner(format!(
                "unknown approval mode '{}'",
                other
            ))),
        }
    }
}

/// Policy decision for `(mode, sensitive)`. `None` means the human must be
/// prompted interactively.
pub fn decide(mode: ApprovalMode, sensitive: bool) -> Option<bool> {
    match mode {
        ApprovalMode::Auto => Some(true),
        ApprovalMode::Sensitive => Some(!sensitive),
        ApprovalMode::Always => None,
    }
}

/// Interactive channel to the human operator.
#[async_trait]
pub trait HumanInterface: Send + Sync {
    /// Yes/no confirmation for an action summary.
    async fn confirm(&self, summary: &str) -> AgentResult<bool>;

    /// Free-form question, e.g. when the planner asks for clarification.
    async fn ask(&self, question: &str) -> AgentResult<String>;
}

/// Terminal prompt implementation.
pub struct StdioHuman;

impl StdioHuman {
    fn read_line_blocking() -> AgentResult<String> {
        let mut input = String::new();
        std::io::stdin()
            .read_line(&mut input)
            .map_err(|e| AgentError::Tool(format!("stdin: {}", e)))?;
        Ok(input.trim().to_string())
    }
}

#[async_trait]
impl HumanInterface for StdioHuman {
    async fn confirm(&self, summary: &str) -> AgentResult<bool> {
        println!("\n🛡️  PERMISSION REQUEST");
        println!("   Agent wants to run: {}", summary);
        print!("   Allow? [y/N]: ");
        std::io::stdout()
            .flush()
            .map_err(|e| AgentError::Tool(format!("stdout: {}", e)))?;

        let answer = tokio::task::spawn_blocking(Self::read_line_blocking)
            .await
            .map_err(|e| AgentError::Tool(format!("prompt task: {}", e)))??;
        Ok(answer.to_lowercase() == "y")
    }

    async fn ask(&self, question: &str) -> AgentResult<String> {
        println!("\n❓ AGENT QUESTION");
        println!("   {}", question);
        print!("   > ");
        std::io::stdout()
            .flush()
            .map_err(|e| AgentError::Tool(format!("stdout: {}", e)))?;

        tokio::task::spawn_blocking(Self::read_line_blocking)
            .await
            .map_err(|e| AgentError::Tool(format!("prompt task: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_matrix() {
        assert_eq!(decide(ApprovalMode::Auto, false), Some(true));
        assert_eq!(decide(ApprovalMode::Auto, true), Some(true));
        assert_eq!(decide(ApprovalMode::Sensitive, false), Some(true));
        assert_eq!(decide(ApprovalMode::Sensitive, true), Some(false));
        assert_eq!(decide(ApprovalMode::Always, false), None);
        assert_eq!(decide(ApprovalMode::Always, true), None);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("auto".parse::<ApprovalMode>().unwrap(), ApprovalMode::Auto);
        assert_eq!(
            "ALWAYS".parse::<ApprovalMode>().unwrap(),
            ApprovalMode::Always
        );
        assert!("yolo".parse::<ApprovalMode>().is_err());
    }
}
