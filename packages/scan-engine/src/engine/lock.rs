//! Lock manager: exclusive, time-bounded ownership of a job.
//!
//! The lock is a (token, acquired-at) pair on the job row. Claiming and
//! releasing are single conditional writes in the store; this module only
//! mints tokens, computes the stale threshold and logs the outcome.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::traits::store::JobStore;
use crate::types::job::{ClaimedJob, Job};

#[derive(Debug)]
pub enum Acquisition {
    Acquired(ClaimedJob),
    /// Another worker holds a live lock, or the job is not claimable now.
    AlreadyLocked,
}

impl Acquisition {
    pub fn into_claim(self) -> Option<ClaimedJob> {
        match self {
            Acquisition::Acquired(claim) => Some(claim),
            Acquisition::AlreadyLocked => None,
        }
    }
}

/// Whether `job`'s lock is older than `max_step_duration` at `now`.
///
/// A job without a lock is never stale.
pub fn is_stale(job: &Job, now: DateTime<Utc>, max_step_duration: Duration) -> bool {
    if job.lock_token.is_none() {
        return false;
    }
    let Some(acquired_at) = job.lock_acquired_at else {
        return true;
    };
    match chrono::Duration::from_std(max_step_duration) {
        Ok(max) => now - acquired_at > max,
        Err(_) => false,
    }
}

pub struct LockManager {
    store: Arc<dyn JobStore>,
    max_step_duration: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn JobStore>, max_step_duration: Duration) -> Self {
        Self {
            store,
            max_step_duration,
        }
    }

    pub fn max_step_duration(&self) -> Duration {
        self.max_step_duration
    }

    fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let max = chrono::Duration::from_std(self.max_step_duration)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        now - max
    }

    pub async fn acquire(&self, job_id: Uuid) -> StoreResult<Acquisition> {
        self.acquire_at(job_id, Utc::now()).await
    }

    /// Try to claim the job with a fresh token.
    pub async fn acquire_at(&self, job_id: Uuid, now: DateTime<Utc>) -> StoreResult<Acquisition> {
        let token = Uuid::new_v4();
        match self
            .store
            .try_claim(job_id, token, now, self.stale_before(now))
            .await?
        {
            Some(claim) => {
                if claim.reclaimed {
                    warn!(job_id = %job_id, step = %claim.job.step, "reclaimed stale lock");
                } else {
                    debug!(job_id = %job_id, step = %claim.job.step, "lock acquired");
                }
                Ok(Acquisition::Acquired(claim))
            }
            None => {
                debug!(job_id = %job_id, "job already locked or not due, skipping");
                Ok(Acquisition::AlreadyLocked)
            }
        }
    }

    /// Release the lock if `token` still holds it.
    ///
    /// A mismatch means another worker reclaimed the job; it is logged and
    /// otherwise ignored.
    pub async fn release(&self, job_id: Uuid, token: Uuid) -> StoreResult<()> {
        if !self.store.release_lock(job_id, token).await? {
            warn!(job_id = %job_id, "lock token mismatch on release, ignoring");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::types::scan::NewScan;

    fn job_locked_at(acquired_at: DateTime<Utc>) -> Job {
        let mut job = Job::new(Uuid::new_v4());
        job.lock_token = Some(Uuid::new_v4());
        job.lock_acquired_at = Some(acquired_at);
        job
    }

    #[test]
    fn unlocked_job_is_not_stale() {
        let job = Job::new(Uuid::new_v4());
        assert!(!is_stale(&job, Utc::now(), Duration::from_secs(1)));
    }

    #[test]
    fn lock_goes_stale_past_max_duration() {
        let now = Utc::now();
        let max = Duration::from_secs(300);
        assert!(!is_stale(&job_locked_at(now - chrono::Duration::seconds(300)), now, max));
        assert!(is_stale(&job_locked_at(now - chrono::Duration::seconds(301)), now, max));
    }

    #[tokio::test]
    async fn acquire_then_release() {
        let store = Arc::new(MemoryStore::new());
        let scan = store
            .create_scan(NewScan::new(Uuid::new_v4(), "acme.test", "Acme"))
            .await
            .unwrap();
        let job = store.create_job(scan.id).await.unwrap();
        let locks = LockManager::new(store.clone(), Duration::from_secs(300));

        let claim = locks.acquire(job.id).await.unwrap().into_claim().unwrap();
        assert!(matches!(
            locks.acquire(job.id).await.unwrap(),
            Acquisition::AlreadyLocked
        ));

        // A stranger's token is a no-op, not an error.
        locks.release(job.id, Uuid::new_v4()).await.unwrap();
        assert!(store.get_job(job.id).await.unwrap().unwrap().lock_token.is_some());

        locks.release(job.id, claim.token).await.unwrap();
        assert!(store.get_job(job.id).await.unwrap().unwrap().lock_token.is_none());
    }
}
