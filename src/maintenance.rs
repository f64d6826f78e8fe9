//! Maintenance Scheduler
//!
//! Recurring housekeeping for long-lived processes: the registry's cache
//! sweep runs every two minutes. Jobs are best-effort; failures are
//! logged, never propagated.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};

use crate::tools::ToolRegistry;

pub struct MaintenanceScheduler {
    scheduler: JobScheduler,
}

impl MaintenanceScheduler {
    pub async fn new() -> anyhow::Result<Self> {
        Ok(Self {
            scheduler: JobScheduler::new().await?,
        })
    }

    /// Schedule the idle-cache sweep and start the clock.
    pub async fn start(&self, registry: Arc<ToolRegistry>) -> anyhow::Result<()> {
        // Every 2 minutes at second 0.
        let job = Job::new_async("0 */2 * * * *", move |_uuid, _l| {
            let registry = registry.clone();
            Box::pin(async move {
                let evicted = registry.sweep_cache().await;
                if evicted > 0 {
                    debug!("Maintenance sweep evicted {} idle tools", evicted);
                }
            })
        })?;

        self.scheduler.add(job).await?;
        self.scheduler.start().await?;
        info!("Maintenance scheduler started (cache sweep every 2 minutes)");
        Ok(())
    }
}
