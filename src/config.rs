//! Configuration
//!
//! Environment is read once at startup; CLI flags override it. Resource
//! bounds live in `Limits` and default to the documented values.

use std::path::PathBuf;
use std::time::Duration;

use crate::agent::ApprovalMode;

/// Resource bounds for caches, search and the run loop.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_cache_size: usize,
    pub max_cache_bytes: u64,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub max_embed_cache: usize,
    pub search_cache_ttl: Duration,
    pub index_batch_size: usize,
    pub max_steps: usize,
    pub top_k: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_cache_size: 100,
            max_cache_bytes: 50 * 1024 * 1024,
            idle_timeout: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(120),
            max_embed_cache: 1000,
            search_cache_ttl: Duration::from_secs(300),
            index_batch_size: 20,
            max_steps: 20,
            top_k: 8,
        }
    }
}

/// Startup configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub approval_mode: ApprovalMode,
    pub data_dir: PathBuf,
    pub model: String,
    pub ollama_host: String,
    pub ollama_port: u16,
    /// OpenAI-compatible endpoint; when set it wins over Ollama.
    pub llm_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub lazy_loading: bool,
    pub limits: Limits,
}

impl Config {
    pub fn from_env() -> Self {
        let mut limits = Limits::default();
        if let Ok(max_steps) = std::env::var("MAX_STEPS") {
            if let Ok(n) = max_steps.parse() {
                limits.max_steps = n;
            }
        }
        if let Ok(top_k) = std::env::var("TOPK_TOOLS") {
            if let Ok(n) = top_k.parse() {
                limits.top_k = n;
            }
        }

        let approval_mode = std::env::var("APPROVAL_MODE")
            .ok()
            .and_then(|m| m.parse().ok())
            .unwrap_or_default();

        Self {
            approval_mode,
            data_dir: PathBuf::from(
                std::env::var("DATA_DIR").unwrap_or_else(|_| "steward_data".to_string()),
            ),
            model: std::env::var("STEWARD_MODEL").unwrap_or_else(|_| "llama3.1:8b".to_string()),
            ollama_host: std::env::var("OLLAMA_HOST")
                .unwrap_or_else(|_| "http://localhost".to_string()),
            ollama_port: std::env::var("OLLAMA_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(11434),
            llm_url: std::env::var("STEWARD_LLM_URL").ok(),
            llm_api_key: std::env::var("STEWARD_LLM_KEY").ok(),
            lazy_loading: std::env::var("STEWARD_LAZY_LOADING")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            limits,
        }
    }
}
