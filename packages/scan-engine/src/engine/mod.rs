//! Job control: locking, retry policy, progress, the controller and the poller.

pub mod controller;
pub mod lock;
pub mod poller;
pub mod progress;
pub mod retry;

use tracing::info;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::traits::store::JobStore;
use crate::types::{
    job::{Job, JobStatusView},
    scan::{NewScan, Scan},
};

/// Create a scan and its pending job. The scan always exists first.
pub async fn enqueue_scan(store: &dyn JobStore, scan: NewScan) -> StoreResult<(Scan, Job)> {
    let scan = store.create_scan(scan).await?;
    let job = store.create_job(scan.id).await?;
    info!(scan_id = %scan.id, job_id = %job.id, domain = %scan.domain, "scan enqueued");
    Ok((scan, job))
}

/// Status of the scan's job in the shape a polling client reads.
pub async fn scan_status(store: &dyn JobStore, scan_id: Uuid) -> StoreResult<Option<JobStatusView>> {
    Ok(store
        .find_job_for_scan(scan_id)
        .await?
        .map(|job| job.status_view()))
}

/// Cancel the scan's job out of band. Returns false if it was already terminal.
pub async fn cancel_scan(store: &dyn JobStore, scan_id: Uuid, reason: &str) -> StoreResult<bool> {
    let Some(job) = store.find_job_for_scan(scan_id).await? else {
        return Ok(false);
    };
    let cancelled = store.cancel_job(job.id, reason).await?;
    if cancelled {
        store.mark_scan_failed(scan_id).await?;
        info!(scan_id = %scan_id, job_id = %job.id, reason, "scan cancelled");
    }
    Ok(cancelled)
}
