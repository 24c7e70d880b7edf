//! Record store trait for job and scan rows.
//!
//! Every mutation is a single conditional write. Operations guarded by the
//! lock take the holder's token and return whether the row matched; a `false`
//! means the caller no longer owns the job and must not act on it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::types::{
    job::{ClaimedJob, Job, Step},
    output::StepOutputs,
    report::AuditReport,
    scan::{NewScan, Scan, ScanResults},
};

/// Typed access to job and scan state. No business rules live here.
#[async_trait]
pub trait JobStore: Send + Sync {
    // ------------------------------------------------------------------
    // Scans
    // ------------------------------------------------------------------

    async fn create_scan(&self, scan: NewScan) -> StoreResult<Scan>;

    async fn get_scan(&self, scan_id: Uuid) -> StoreResult<Option<Scan>>;

    /// Persist clusters, hub pages, off-site items and the scan's artifact version.
    ///
    /// Returns the artifact version number, monotonic per project. Saving
    /// again for the same scan replaces its rows and keeps its version.
    async fn save_scan_results(&self, scan_id: Uuid, results: &ScanResults) -> StoreResult<i32>;

    /// Mirror a terminal job failure onto the scan. Artifact fields are untouched.
    async fn mark_scan_failed(&self, scan_id: Uuid) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Insert a `pending` job at the first step with zero progress.
    async fn create_job(&self, scan_id: Uuid) -> StoreResult<Job>;

    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<Job>>;

    async fn find_job_for_scan(&self, scan_id: Uuid) -> StoreResult<Option<Job>>;

    /// Jobs the poller may pick up at `now`, oldest first.
    ///
    /// Pending and due with no lock, or locked before `stale_before`.
    async fn find_eligible(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Job>>;

    /// Atomically take the job's lock if no live lock exists.
    ///
    /// On success the job moves to `processing`. `None` means another worker
    /// holds a live lock, or the job is terminal or not yet due.
    async fn try_claim(
        &self,
        job_id: Uuid,
        token: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<ClaimedJob>>;

    /// Clear the lock if `token` still holds it; `processing` returns to `pending`.
    async fn release_lock(&self, job_id: Uuid, token: Uuid) -> StoreResult<bool>;

    /// Write substep text and percentage if `percentage` is not below the
    /// stored value and the job is still processing `step`.
    async fn report_progress(
        &self,
        job_id: Uuid,
        step: Step,
        label: &str,
        percentage: i16,
    ) -> StoreResult<bool>;

    /// Move to `next_step` as `pending`, store outputs and clear the lock.
    ///
    /// Resets per-step attempts and the retry timestamp.
    async fn advance_step(
        &self,
        job_id: Uuid,
        token: Uuid,
        next_step: Step,
        outputs: &StepOutputs,
        percentage: i16,
        label: &str,
    ) -> StoreResult<bool>;

    /// Stay at the current step as `pending` with updated retry bookkeeping.
    async fn schedule_retry(
        &self,
        job_id: Uuid,
        token: Uuid,
        attempt_count: i32,
        next_retry_at: Option<DateTime<Utc>>,
        last_error: &str,
    ) -> StoreResult<bool>;

    /// Terminal failure. Clears the lock.
    async fn fail_job(
        &self,
        job_id: Uuid,
        token: Uuid,
        attempt_count: i32,
        last_error: &str,
    ) -> StoreResult<bool>;

    /// Terminal success at 100%. Clears the lock.
    ///
    /// The scan takes `artifact` and `report` in the same write, and only if
    /// the job row matched. A scan that is no longer pending is left alone.
    async fn complete_job(
        &self,
        job_id: Uuid,
        token: Uuid,
        outputs: &StepOutputs,
        artifact: &str,
        report: &AuditReport,
    ) -> StoreResult<bool>;

    /// Out-of-band cancel: `failed` unless already terminal. Ignores the lock.
    async fn cancel_job(&self, job_id: Uuid, reason: &str) -> StoreResult<bool>;
}
