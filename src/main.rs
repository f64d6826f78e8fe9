//! Steward CLI entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use steward::agent::{
    AgentController, ApprovalMode, ArgumentInferencer, LlmProvider, OllamaProvider,
    OpenAiCompatProvider, Planner, RunStatus, StdioHuman,
};
use steward::config::Config;
use steward::maintenance::MaintenanceScheduler;
use steward::store::RunStore;
use steward::tools::{
    CalculatorTool, CurrentTimeTool, Embedder, FastembedEmbedder, FileReadTool, ManifestLoader,
    RegistryConfig, SummarizeTool, ToolRegistry, WebSearchTool,
};
use steward::utils::init_telemetry;

#[derive(Parser, Debug)]
#[command(name = "steward")]
#[command(about = "Autonomous task-execution engine with a lazily-loaded tool registry")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Data directory for runs and the tool index
    #[arg(long, global = true)]
    data_dir: Option<std::path::PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a task until it finishes, pauses or asks for help
    Run {
        /// The task, in natural language
        task: Vec<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        topk: Option<usize>,
        #[arg(long)]
        max_steps: Option<usize>,
        #[arg(long)]
        approval_mode: Option<ApprovalModeArg>,
        /// Load catalog tools on demand instead of eagerly at startup
        #[arg(long)]
        lazy_loading: bool,
    },
    /// Continue a paused run from its persisted trajectory
    Resume {
        run_id: String,
        #[arg(long)]
        max_steps: Option<usize>,
        #[arg(long)]
        approval_mode: Option<ApprovalModeArg>,
    },
    /// List catalog tools
    Tools {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        loaded_only: bool,
    },
    /// Semantic search over tool descriptions
    ToolSearch {
        query: Vec<String>,
        #[arg(long)]
        topk: Option<usize>,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ApprovalModeArg {
    Auto,
    Always,
    Sensitive,
}

impl From<ApprovalModeArg> for ApprovalMode {
    fn from(arg: ApprovalModeArg) -> Self {
        match arg {
            ApprovalModeArg::Auto => ApprovalMode::Auto,
            ApprovalModeArg::Always => ApprovalMode::Always,
            ApprovalModeArg::Sensitive => ApprovalMode::Sensitive,
        }
    }
}

struct Runtime {
    config: Config,
    registry: Arc<ToolRegistry>,
    store: Arc<RunStore>,
    provider: Arc<dyn LlmProvider>,
}

impl Runtime {
    async fn bootstrap(config: Config) -> anyhow::Result<Self> {
        let provider: Arc<dyn LlmProvider> = match config.llm_url {
            Some(ref url) => Arc::new(OpenAiCompatProvider::new(
                url.clone(),
                config.llm_api_key.clone(),
            )),
            None => Arc::new(OllamaProvider::from_host(
                &config.ollama_host,
                config.ollama_port,
            )),
        };

        let embedder: Arc<dyn Embedder> = Arc::new(FastembedEmbedder::new()?);
        let loader = Arc::new(ManifestLoader::new(provider.clone(), config.model.clone()));

        let mut registry_config = RegistryConfig::under(&config.data_dir);
        registry_config.cache_limits.max_entries = config.limits.max_cache_size;
        registry_config.cache_limits.max_bytes = config.limits.max_cache_bytes;
        registry_config.cache_limits.idle_timeout = config.limits.idle_timeout;
        registry_config.max_embed_cache = config.limits.max_embed_cache;
        registry_config.search_cache_ttl = config.limits.search_cache_ttl;
        registry_config.index_batch_size = config.limits.index_batch_size;

        let registry = Arc::new(ToolRegistry::new(registry_config, embedder, loader));

        registry.register(Arc::new(CalculatorTool)).await?;
        registry.register(Arc::new(WebSearchTool::new())).await?;
        registry
            .register(Arc::new(SummarizeTool::new(
                provider.clone(),
                config.model.clone(),
            )))
            .await?;
        registry.register(Arc::new(FileReadTool)).await?;
        registry.register(Arc::new(CurrentTimeTool)).await?;

        let scanned = registry.scan().await?;
        info!(
            "Registry ready: {} catalog tools ({} scanned)",
            registry.catalog_len().await,
            scanned
        );

        if !config.lazy_loading {
            for entry in registry.catalog_entries().await {
                if let Err(e) = registry.get_or_load(&entry.name).await {
                    warn!("Eager load of '{}' failed: {}", entry.name, e);
                }
            }
            info!("Eagerly loaded {} tools", registry.cache_len().await);
        }

        let store = RunStore::new(&config.data_dir)?;
        Ok(Self {
            config,
            registry,
            store,
            provider,
        })
    }

    fn controller(&self) -> AgentController {
        let planner = Planner::new(
            self.registry.clone(),
            self.provider.clone(),
            self.config.model.clone(),
        );
        let inferencer =
            ArgumentInferencer::new(self.provider.clone(), self.config.model.clone());
        AgentController::new(
            self.registry.clone(),
            planner,
            inferencer,
            self.store.clone(),
            Arc::new(StdioHuman),
        )
        .with_config(steward::agent::ControllerConfig {
            approval_mode: self.config.approval_mode,
            max_steps: self.config.limits.max_steps,
            top_k: self.config.limits.top_k,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let _guard = init_telemetry("steward");
    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    match args.command {
        Command::Run {
            task,
            model,
            topk,
            max_steps,
            approval_mode,
            lazy_loading,
        } => {
            if task.is_empty() {
                anyhow::bail!("no task given");
            }
            if let Some(model) = model {
                config.model = model;
            }
            if let Some(topk) = topk {
                config.limits.top_k = topk;
            }
            if let Some(max_steps) = max_steps {
                config.limits.max_steps = max_steps;
            }
            if let Some(mode) = approval_mode {
                config.approval_mode = mode.into();
            }
            if lazy_loading {
                config.lazy_loading = true;
            }

            let runtime = Runtime::bootstrap(config).await?;
            let scheduler = MaintenanceScheduler::new().await?;
            scheduler.start(runtime.registry.clone()).await?;

            let controller = runtime.controller();
            let interrupt = controller.interrupt_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\nInterrupt requested; pausing after the current step...");
                    interrupt.store(true, std::sync::atomic::Ordering::SeqCst);
                }
            });

            let run = controller.execute_task(&task.join(" ")).await?;
            Ok(report(&run))
        }
        Command::Resume {
            run_id,
            max_steps,
            approval_mode,
        } => {
            if let Some(max_steps) = max_steps {
                config.limits.max_steps = max_steps;
            }
            if let Some(mode) = approval_mode {
                config.approval_mode = mode.into();
            }

            let runtime = Runtime::bootstrap(config).await?;
            let scheduler = MaintenanceScheduler::new().await?;
            scheduler.start(runtime.registry.clone()).await?;

            let controller = runtime.controller();
            let interrupt = controller.interrupt_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    interrupt.store(true, std::sync::atomic::Ordering::SeqCst);
                }
            });

            let run = controller.resume(&run_id).await?;
            Ok(report(&run))
        }
        Command::Tools {
            category,
            loaded_only,
        } => {
            let runtime = Runtime::bootstrap(config).await?;
            for entry in runtime.registry.catalog_entries().await {
                if let Some(ref category) = category {
                    if &entry.category != category {
                        continue;
                    }
                }
                let loaded = runtime.registry.is_loaded(&entry.name).await;
                if loaded_only && !loaded {
                    continue;
                }
                println!(
                    "{:<24} [{}]{} {}",
                    entry.name,
                    entry.category,
                    if loaded { " (loaded)" } else { "" },
                    entry.description
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::ToolSearch { query, topk } => {
            if query.is_empty() {
                anyhow::bail!("no query given");
            }
            let runtime = Runtime::bootstrap(config).await?;
            let k = topk.unwrap_or(runtime.config.limits.top_k);
            let tools = runtime.registry.search(&query.join(" "), k).await?;
            for tool in tools {
                println!("{:<24} {}", tool.name(), tool.description());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Print the outcome and map the run status to an exit code.
fn report(run: &steward::agent::Run) -> ExitCode {
    match run.status {
        RunStatus::Done => {
            let output = run
                .steps
                .iter()
                .rev()
                .find(|s| s.kind == steward::agent::StepKind::Final)
                .and_then(|s| s.data["output"].as_str().map(|o| o.to_string()))
                .unwrap_or_default();
            println!("{}", output);
            ExitCode::SUCCESS
        }
        RunStatus::Paused => {
            // The run id is the handle for `steward resume`.
            println!("{}", run.run_id);
            ExitCode::from(3)
        }
        _ => ExitCode::FAILURE,
    }
}
