//! Agent Module
//!
//! The reasoning-and-acting core: planner, argument inference, approval
//! policy and the run-loop controller.

mod approval;
mod controller;
mod inference;
mod planner;
pub mod provider;
mod types;

pub use approval::{decide, ApprovalMode, HumanInterface, StdioHuman};
pub use controller::{AgentController, ControllerConfig};
pub use inference::ArgumentInferencer;
pub use planner::Planner;
pub use provider::{LlmProvider, OllamaProvider, OpenAiCompatProvider};
pub use types::{
    now_ms, render_history, Action, AgentError, AgentResult, Run, RunStatus, StepKind, StepRecord,
};

/// Truncate to `max_len` on a char boundary, appending an ellipsis.
/// Newlines collapse to spaces so the result stays a single line.
pub fn truncate(s: &str, max_len: usize) -> String {
    let s = s.replace('\n', " ");
    if s.len() <= max_len {
        s
    } else {
        let target_len = max_len.saturating_sub(3);
        let mut end = target_len;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        let long = "a".repeat(20);
        assert_eq!(truncate(&long, 10), format!("{}...", "a".repeat(7)));
        // Multi-byte content must not split mid-char.
        let emoji = "🦀🦀🦀🦀🦀";
        let cut = truncate(emoji, 9);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_truncate_flattens_newlines() {
        assert_eq!(truncate("a\nb", 10), "a b");
    }
}
