//! Run Store
//!
//! Durable, per-run append-only log. One JSON file per run under
//! `DATA_DIR/runs/`, written atomically via a temp file and rename.
//! Single-writer per run; failures here are fatal to the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::agent::{now_ms, AgentError, AgentResult, Run, RunStatus, StepKind, StepRecord};

pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub fn new(data_dir: &Path) -> AgentResult<Arc<Self>> {
        let dir = data_dir.join("runs");
        std::fs::create_dir_all(&dir)
            .map_err(|e| AgentError::Store(format!("create {:?}: {}", dir, e)))?;
        Ok(Arc::new(Self { dir }))
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }

    /// Create and persist a fresh run for a task.
    pub async fn create(&self, task: &str) -> AgentResult<Run> {
        let run = Run::new(task);
        self.save(&run).await?;
        info!("Created run {}", run.run_id);
        Ok(run)
    }

    /// Load a run by id.
    pub async fn load(&self, run_id: &str) -> AgentResult<Run> {
        let path = self.path_for(run_id);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| AgentError::Store(format!("load run {}: {}", run_id, e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| AgentError::Store(format!("parse run {}: {}", run_id, e)))
    }

    /// Append one step and persist. After this returns the step is durable
    /// and `updated_at` has been bumped.
    pub async fn append_step(
        &self,
        run: &mut Run,
        kind: StepKind,
        data: Value,
    ) -> AgentResult<StepRecord> {
        let step = run.make_step(kind, data);
        run.steps.push(step.clone());
        run.updated_at = now_ms().max(run.updated_at);
        self.save(run).await?;
        debug!("Run {}: appended {:?} step", run.run_id, kind);
        Ok(step)
    }

    /// Persist the current run state atomically.
    pub async fn save(&self, run: &Run) -> AgentResult<()> {
        let body = serde_json::to_vec_pretty(run)
            .map_err(|e| AgentError::Store(format!("serialize run: {}", e)))?;
        let path = self.path_for(&run.run_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| AgentError::Store(format!("write {:?}: {}", tmp, e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| AgentError::Store(format!("rename {:?}: {}", path, e)))?;
        Ok(())
    }

    /// Update status and persist.
    pub async fn set_status(&self, run: &mut Run, status: RunStatus) -> AgentResult<()> {
        run.status = status;
        run.updated_at = now_ms().max(run.updated_at);
        self.save(run).await
    }

    /// Run ids present on disk.
    pub async fn list(&self) -> AgentResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut listing = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| AgentError::Store(format!("list runs: {}", e)))?;
        while let Some(entry) = listing
            .next_entry()
            .await
            .map_err(|e| AgentError::Store(format!("list runs: {}", e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
