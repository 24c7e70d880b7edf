//! Pipeline controller: one step per invocation.
//!
//! ```text
//! run(job_id)
//!     │
//!     ├─► load job, skip if terminal
//!     ├─► acquire lock (LockManager)
//!     │       └─► stale reclaim ─► charge a transient failure, stop
//!     ├─► dispatch current step (StepExecutors), under the invocation ceiling
//!     └─► persist the disposition
//!             ├─► Success   ─► advance_step / complete_job, then notify
//!             ├─► Retryable ─► decide() ─► schedule_retry / fail_job
//!             └─► Fatal     ─► fail_job
//! ```
//!
//! Every transition write carries the lock token and clears the lock, so a
//! worker that lost its lock cannot overwrite the job. Executors never see
//! the store's transition methods. The scan is completed in the same write
//! as the job, and the completion notice goes out only after it lands.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::lock::{Acquisition, LockManager};
use super::progress::ProgressReporter;
use super::retry::{decide, FailureKind, RetryDecision};
use crate::error::{StoreError, StoreResult};
use crate::steps::{Collaborators, StepContext, StepExecutors, StepOutcome};
use crate::traits::{
    notifier::{Notifier, TEMPLATE_SCAN_COMPLETE, TEMPLATE_SCAN_FAILED},
    store::JobStore,
};
use crate::types::{
    config::EngineConfig,
    job::{ClaimedJob, Job, Step},
    output::{FinalizeOutput, StepOutputs},
    scan::Scan,
};

/// Message recorded when a lock is reclaimed from a worker that overran.
pub const STALE_LOCK_ERROR: &str = "worker exceeded max step duration";

/// Why an invocation did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Job is complete or failed
    Terminal,
    /// Another worker holds a live lock, or the job is not due
    Locked,
}

/// What one controller invocation did to the job.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Advanced {
        to: Step,
    },
    Completed,
    RetryScheduled {
        attempt: i32,
        next_retry_at: Option<DateTime<Utc>>,
    },
    Failed {
        attempt: i32,
    },
    Skipped(SkipReason),
    /// A transition write found a different lock holder.
    LockLost,
}

pub struct PipelineController {
    store: Arc<dyn JobStore>,
    executors: StepExecutors,
    notifier: Arc<dyn Notifier>,
    locks: LockManager,
    config: EngineConfig,
}

impl PipelineController {
    pub fn new(
        store: Arc<dyn JobStore>,
        executors: StepExecutors,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        let locks = LockManager::new(store.clone(), config.max_step_duration);
        Self {
            store,
            executors,
            notifier,
            locks,
            config,
        }
    }

    /// Controller wired to the standard executors.
    pub fn with_collaborators(
        store: Arc<dyn JobStore>,
        collaborators: &Collaborators,
        config: EngineConfig,
    ) -> Self {
        let executors = StepExecutors::new(store.clone(), collaborators);
        Self::new(store, executors, collaborators.notifier.clone(), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn run(&self, job_id: Uuid) -> StoreResult<Disposition> {
        self.run_at(job_id, Utc::now()).await
    }

    /// Execute at most one step of the job.
    pub async fn run_at(&self, job_id: Uuid, now: DateTime<Utc>) -> StoreResult<Disposition> {
        let job = self.store.get_job(job_id).await?.ok_or(StoreError::NotFound {
            entity: "scan_job",
            id: job_id,
        })?;
        if job.status.is_terminal() {
            debug!(job_id = %job_id, status = %job.status, "job is terminal, skipping");
            return Ok(Disposition::Skipped(SkipReason::Terminal));
        }

        let claim = match self.locks.acquire_at(job_id, now).await? {
            Acquisition::Acquired(claim) => claim,
            Acquisition::AlreadyLocked => return Ok(Disposition::Skipped(SkipReason::Locked)),
        };
        let token = claim.token;

        match self.advance(claim, now).await {
            Ok(disposition) => Ok(disposition),
            Err(e) => {
                error!(job_id = %job_id, error = %e, "step invocation failed, releasing lock");
                if let Err(release_err) = self.locks.release(job_id, token).await {
                    warn!(job_id = %job_id, error = %release_err, "failed to release lock");
                }
                Err(e)
            }
        }
    }

    async fn advance(&self, claim: ClaimedJob, now: DateTime<Utc>) -> StoreResult<Disposition> {
        let ClaimedJob {
            job,
            token,
            reclaimed,
        } = claim;

        let Some(scan) = self.store.get_scan(job.scan_id).await? else {
            let message = format!("scan {} not found", job.scan_id);
            return self.fail(&job, token, job.attempt_count, &message, None).await;
        };

        if reclaimed {
            warn!(job_id = %job.id, step = %job.step, "charging a timeout for the previous holder");
            return self
                .retry_or_fail(&job, token, FailureKind::Transient, STALE_LOCK_ERROR, &scan, now)
                .await;
        }

        let step = job.step;
        let executor = self.executors.for_step(step);
        let progress = ProgressReporter::new(self.store.clone(), job.id, step);
        info!(
            job_id = %job.id,
            step = %step,
            attempt = job.attempt_count,
            "running step"
        );

        let ctx = StepContext {
            job: &job,
            scan: &scan,
            progress: &progress,
            config: &self.config,
            now,
        };
        let outcome = match tokio::time::timeout(self.config.invocation_timeout, executor.run(&ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => StepOutcome::transient(format!(
                "{} step exceeded the {:?} invocation ceiling",
                step, self.config.invocation_timeout
            )),
        };

        match outcome {
            StepOutcome::Success(output) => {
                let mut outputs = job.outputs.clone();
                output.apply_to(&mut outputs);

                let Some(next) = step.next() else {
                    return self.complete(&job, token, &outputs, &scan).await;
                };
                let label = format!("{} complete", capitalize(step.as_str()));
                if !self
                    .store
                    .advance_step(job.id, token, next, &outputs, step.end_percent(), &label)
                    .await?
                {
                    return Ok(self.lock_lost(&job));
                }
                info!(job_id = %job.id, from = %step, to = %next, "step succeeded");
                Ok(Disposition::Advanced { to: next })
            }
            StepOutcome::Retryable { kind, message } => {
                self.retry_or_fail(&job, token, kind, &message, &scan, now)
                    .await
            }
            StepOutcome::Fatal(message) => {
                self.fail(&job, token, job.attempt_count, &message, Some(&scan))
                    .await
            }
        }
    }

    async fn complete(
        &self,
        job: &Job,
        token: Uuid,
        outputs: &StepOutputs,
        scan: &Scan,
    ) -> StoreResult<Disposition> {
        let Some(finalize) = outputs.finalize() else {
            let message = "finalize produced no output";
            return self.fail(job, token, job.attempt_count, message, Some(scan)).await;
        };
        if !self
            .store
            .complete_job(job.id, token, outputs, &finalize.artifact, &finalize.report)
            .await?
        {
            return Ok(self.lock_lost(job));
        }
        info!(
            job_id = %job.id,
            scan_id = %job.scan_id,
            overall_score = finalize.report.overall_score,
            artifact_version = finalize.artifact_version,
            "job complete"
        );

        self.notify_complete(scan, finalize).await;
        Ok(Disposition::Completed)
    }

    async fn retry_or_fail(
        &self,
        job: &Job,
        token: Uuid,
        kind: FailureKind,
        message: &str,
        scan: &Scan,
        now: DateTime<Utc>,
    ) -> StoreResult<Disposition> {
        let attempt = job.attempt_count + 1;
        let next_retry_at = match decide(attempt, kind) {
            RetryDecision::RetryImmediately => None,
            RetryDecision::RetryAfter(delay) => Some(now + delay),
            RetryDecision::GiveUp => {
                return self.fail(job, token, attempt, message, Some(scan)).await;
            }
        };

        if !self
            .store
            .schedule_retry(job.id, token, attempt, next_retry_at, message)
            .await?
        {
            return Ok(self.lock_lost(job));
        }

        warn!(
            job_id = %job.id,
            step = %job.step,
            attempt,
            kind = %kind,
            next_retry_at = ?next_retry_at,
            error = message,
            "step failed, retry scheduled"
        );
        Ok(Disposition::RetryScheduled {
            attempt,
            next_retry_at,
        })
    }

    async fn fail(
        &self,
        job: &Job,
        token: Uuid,
        attempt: i32,
        message: &str,
        scan: Option<&Scan>,
    ) -> StoreResult<Disposition> {
        if !self.store.fail_job(job.id, token, attempt, message).await? {
            return Ok(self.lock_lost(job));
        }
        error!(job_id = %job.id, step = %job.step, attempt, error = message, "job failed");

        if let Err(e) = self.store.mark_scan_failed(job.scan_id).await {
            warn!(scan_id = %job.scan_id, error = %e, "failed to mark scan failed");
        }
        if let Some(scan) = scan {
            self.notify_failure(job, scan, message).await;
        }
        Ok(Disposition::Failed { attempt })
    }

    async fn notify_complete(&self, scan: &Scan, finalize: &FinalizeOutput) {
        let Some(recipient) = scan.notification_recipient.as_deref() else {
            return;
        };
        let data = json!({
            "scan_id": scan.id,
            "domain": scan.domain,
            "business_name": scan.business_name,
            "overall_score": finalize.report.overall_score,
            "artifact_version": finalize.artifact_version,
            "recommendations": finalize.recommendations,
        });
        if let Err(e) = self.notifier.send(recipient, TEMPLATE_SCAN_COMPLETE, &data).await {
            warn!(scan_id = %scan.id, error = %e, "completion notification failed");
        }
    }

    async fn notify_failure(&self, job: &Job, scan: &Scan, message: &str) {
        let Some(recipient) = scan.notification_recipient.as_deref() else {
            return;
        };
        let data = json!({
            "scan_id": scan.id,
            "job_id": job.id,
            "domain": scan.domain,
            "business_name": scan.business_name,
            "step": job.step,
            "error": message,
        });
        if let Err(e) = self.notifier.send(recipient, TEMPLATE_SCAN_FAILED, &data).await {
            warn!(scan_id = %scan.id, error = %e, "failure notification failed");
        }
    }

    fn lock_lost(&self, job: &Job) -> Disposition {
        warn!(job_id = %job.id, step = %job.step, "lock token no longer matches, dropping result");
        Disposition::LockLost
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
