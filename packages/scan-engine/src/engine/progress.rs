//! Progress reporter: substep text and a monotonic percentage.

use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::traits::store::JobStore;
use crate::types::job::Step;

/// Reports progress for one job at one step.
///
/// Writes go through the store's monotonic guard, so a retried step that
/// restarts lower in its band cannot pull visible progress backwards.
/// Reporting is best effort: failures are logged, never raised.
#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<dyn JobStore>,
    job_id: Uuid,
    step: Step,
}

impl ProgressReporter {
    pub fn new(store: Arc<dyn JobStore>, job_id: Uuid, step: Step) -> Self {
        Self {
            store,
            job_id,
            step,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn step(&self) -> Step {
        self.step
    }

    /// Persist `label` at an absolute percentage.
    pub async fn report(&self, label: &str, percentage: i16) {
        let percentage = percentage.clamp(0, 100);
        match self
            .store
            .report_progress(self.job_id, self.step, label, percentage)
            .await
        {
            Ok(true) => {
                debug!(job_id = %self.job_id, step = %self.step, percentage, label, "progress");
            }
            Ok(false) => {
                debug!(
                    job_id = %self.job_id,
                    step = %self.step,
                    percentage,
                    "progress write skipped (lower than stored or job moved on)"
                );
            }
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "failed to report progress");
            }
        }
    }

    /// Persist `label` at a fraction (0.0 to 1.0) of this step's band.
    pub async fn report_fraction(&self, label: &str, fraction: f64) {
        self.report(label, self.step.percent_at(fraction)).await;
    }
}
