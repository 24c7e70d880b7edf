//! Scheduler/poller: the periodic entry point.
//!
//! Each tick selects eligible jobs and runs the controller on each with a
//! bounded fan-out. Nothing carries over between ticks except what the store
//! holds, so a tick can run in any process.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use super::controller::{Disposition, PipelineController, SkipReason};
use crate::error::StoreResult;
use crate::traits::store::JobStore;

/// Per-tick tally of controller dispositions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub selected: usize,
    pub advanced: usize,
    pub completed: usize,
    pub retries_scheduled: usize,
    pub failed: usize,
    pub skipped: usize,
    pub lock_lost: usize,
    /// Invocations that hit a store error.
    pub errors: usize,
}

impl TickReport {
    fn record(&mut self, result: &StoreResult<Disposition>) {
        match result {
            Ok(Disposition::Advanced { .. }) => self.advanced += 1,
            Ok(Disposition::Completed) => self.completed += 1,
            Ok(Disposition::RetryScheduled { .. }) => self.retries_scheduled += 1,
            Ok(Disposition::Failed { .. }) => self.failed += 1,
            Ok(Disposition::Skipped(SkipReason::Terminal | SkipReason::Locked)) => {
                self.skipped += 1
            }
            Ok(Disposition::LockLost) => self.lock_lost += 1,
            Err(_) => self.errors += 1,
        }
    }
}

pub struct Poller {
    store: Arc<dyn JobStore>,
    controller: Arc<PipelineController>,
}

impl Poller {
    pub fn new(store: Arc<dyn JobStore>, controller: Arc<PipelineController>) -> Self {
        Self { store, controller }
    }

    pub async fn tick(&self) -> StoreResult<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick at `now`.
    ///
    /// A failed selection query is returned as an error and no job is
    /// charged; per-job store errors are counted and logged.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> StoreResult<TickReport> {
        let config = self.controller.config();
        let jobs = match self
            .store
            .find_eligible(now, config.stale_before(now), config.poll_batch_limit)
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "failed to select eligible jobs");
                return Err(e);
            }
        };

        let report = Arc::new(Mutex::new(TickReport {
            selected: jobs.len(),
            ..TickReport::default()
        }));
        if jobs.is_empty() {
            debug!("no eligible jobs");
        }

        stream::iter(jobs)
            .for_each_concurrent(config.fan_out.max(1), |job| {
                let controller = self.controller.clone();
                let report = report.clone();
                async move {
                    let result = controller.run_at(job.id, now).await;
                    if let Err(e) = &result {
                        error!(job_id = %job.id, error = %e, "controller invocation failed");
                    }
                    if let Ok(mut report) = report.lock() {
                        report.record(&result);
                    }
                }
            })
            .await;

        let report = match report.lock() {
            Ok(report) => report.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if report.selected > 0 {
            info!(
                selected = report.selected,
                advanced = report.advanced,
                completed = report.completed,
                retries = report.retries_scheduled,
                failed = report.failed,
                skipped = report.skipped,
                errors = report.errors,
                "poll tick finished"
            );
        }
        Ok(report)
    }
}
