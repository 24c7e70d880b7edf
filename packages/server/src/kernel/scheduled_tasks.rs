//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! The poll tick is the only periodic task. Each run selects eligible scan
//! jobs and advances each by one step.
//!
//! ```text
//! Scheduler (every POLL_INTERVAL_SECS)
//!     │
//!     └─► Poller::tick()
//!             └─► For each eligible job → PipelineController::run()
//! ```

use anyhow::Result;
use scan_engine::Poller;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

/// Start the periodic poll tick
pub async fn start_scheduler(poller: Arc<Poller>, interval: Duration) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // A tick still running when the next one fires is left to finish alone
    let running = Arc::new(Mutex::new(()));
    let poll_job = Job::new_repeated_async(interval, move |_uuid, _lock| {
        let poller = poller.clone();
        let running = running.clone();
        Box::pin(async move {
            let Ok(_guard) = running.try_lock() else {
                tracing::debug!("Previous poll tick still running, skipping");
                return;
            };
            if let Err(e) = poller.tick().await {
                tracing::error!("Poll tick failed: {}", e);
            }
        })
    })?;

    scheduler.add(poll_job).await?;
    scheduler.start().await?;

    tracing::info!("Scheduled tasks started (poll tick every {:?})", interval);
    Ok(scheduler)
}
