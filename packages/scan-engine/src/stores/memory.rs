//! In-memory record store for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::traits::store::JobStore;
use crate::types::{
    job::{ClaimedJob, Job, JobStatus, Step},
    output::StepOutputs,
    report::AuditReport,
    scan::{NewScan, Scan, ScanResults, ScanStatus},
};

#[derive(Default)]
struct State {
    scans: HashMap<Uuid, Scan>,
    jobs: HashMap<Uuid, Job>,
    results: HashMap<Uuid, ScanResults>,
    /// Latest version per project.
    artifact_versions: HashMap<Uuid, i32>,
    /// Version assigned to each scan.
    scan_versions: HashMap<Uuid, i32>,
}

/// In-memory storage for scans and jobs.
///
/// All state sits behind one lock, so each operation is atomic the same way
/// a single conditional `UPDATE` is. Data is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }

    /// Insert or replace a job row as-is.
    pub fn put_job(&self, job: Job) -> StoreResult<()> {
        self.write()?.jobs.insert(job.id, job);
        Ok(())
    }

    pub fn job_count(&self) -> StoreResult<usize> {
        Ok(self.read()?.jobs.len())
    }

    /// The result set last saved for a scan.
    pub fn saved_results(&self, scan_id: Uuid) -> StoreResult<Option<ScanResults>> {
        Ok(self.read()?.results.get(&scan_id).cloned())
    }

    pub fn latest_artifact_version(&self, project_id: Uuid) -> StoreResult<Option<i32>> {
        Ok(self.read()?.artifact_versions.get(&project_id).copied())
    }
}

/// Apply `f` to the job only if `token` holds its lock and it is processing.
fn with_held_job(
    state: &mut State,
    job_id: Uuid,
    token: Uuid,
    f: impl FnOnce(&mut Job),
) -> bool {
    match state.jobs.get_mut(&job_id) {
        Some(job) if job.lock_token == Some(token) && job.status == JobStatus::Processing => {
            f(job);
            job.lock_token = None;
            job.lock_acquired_at = None;
            job.updated_at = Utc::now();
            true
        }
        _ => false,
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_scan(&self, scan: NewScan) -> StoreResult<Scan> {
        let scan = scan.into_scan();
        self.write()?.scans.insert(scan.id, scan.clone());
        Ok(scan)
    }

    async fn get_scan(&self, scan_id: Uuid) -> StoreResult<Option<Scan>> {
        Ok(self.read()?.scans.get(&scan_id).cloned())
    }

    async fn save_scan_results(&self, scan_id: Uuid, results: &ScanResults) -> StoreResult<i32> {
        let mut state = self.write()?;
        let project_id = state
            .scans
            .get(&scan_id)
            .map(|s| s.project_id)
            .ok_or(StoreError::NotFound {
                entity: "scan",
                id: scan_id,
            })?;

        let version = match state.scan_versions.get(&scan_id) {
            Some(version) => *version,
            None => {
                let latest = state.artifact_versions.entry(project_id).or_insert(0);
                *latest += 1;
                let version = *latest;
                state.scan_versions.insert(scan_id, version);
                version
            }
        };

        state.results.insert(scan_id, results.clone());
        Ok(version)
    }

    async fn mark_scan_failed(&self, scan_id: Uuid) -> StoreResult<()> {
        let mut state = self.write()?;
        if let Some(scan) = state.scans.get_mut(&scan_id) {
            if scan.status != ScanStatus::Complete {
                scan.status = ScanStatus::Failed;
            }
        }
        Ok(())
    }

    async fn create_job(&self, scan_id: Uuid) -> StoreResult<Job> {
        let job = Job::new(scan_id);
        self.write()?.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<Job>> {
        Ok(self.read()?.jobs.get(&job_id).cloned())
    }

    async fn find_job_for_scan(&self, scan_id: Uuid) -> StoreResult<Option<Job>> {
        Ok(self
            .read()?
            .jobs
            .values()
            .filter(|j| j.scan_id == scan_id)
            .max_by_key(|j| j.created_at)
            .cloned())
    }

    async fn find_eligible(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Job>> {
        let state = self.read()?;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| j.is_eligible(now, stale_before))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn try_claim(
        &self,
        job_id: Uuid,
        token: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<ClaimedJob>> {
        let mut state = self.write()?;
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if !job.is_eligible(now, stale_before) {
            return Ok(None);
        }

        let reclaimed = job.lock_token.is_some();
        job.lock_token = Some(token);
        job.lock_acquired_at = Some(now);
        job.status = JobStatus::Processing;
        job.updated_at = now;

        Ok(Some(ClaimedJob {
            job: job.clone(),
            token,
            reclaimed,
        }))
    }

    async fn release_lock(&self, job_id: Uuid, token: Uuid) -> StoreResult<bool> {
        let mut state = self.write()?;
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.lock_token == Some(token) => {
                job.lock_token = None;
                job.lock_acquired_at = None;
                if job.status == JobStatus::Processing {
                    job.status = JobStatus::Pending;
                }
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn report_progress(
        &self,
        job_id: Uuid,
        step: Step,
        label: &str,
        percentage: i16,
    ) -> StoreResult<bool> {
        let mut state = self.write()?;
        match state.jobs.get_mut(&job_id) {
            Some(job)
                if job.status == JobStatus::Processing
                    && job.step == step
                    && percentage >= job.progress_percentage =>
            {
                job.progress_percentage = percentage;
                job.substep_label = label.to_string();
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn advance_step(
        &self,
        job_id: Uuid,
        token: Uuid,
        next_step: Step,
        outputs: &StepOutputs,
        percentage: i16,
        label: &str,
    ) -> StoreResult<bool> {
        let mut state = self.write()?;
        Ok(with_held_job(&mut state, job_id, token, |job| {
            if next_step > job.step {
                job.step = next_step;
            }
            job.outputs = outputs.clone();
            job.progress_percentage = job.progress_percentage.max(percentage);
            job.substep_label = label.to_string();
            job.step_attempts = 0;
            job.next_retry_at = None;
            job.last_error = None;
            job.status = JobStatus::Pending;
        }))
    }

    async fn schedule_retry(
        &self,
        job_id: Uuid,
        token: Uuid,
        attempt_count: i32,
        next_retry_at: Option<DateTime<Utc>>,
        last_error: &str,
    ) -> StoreResult<bool> {
        let mut state = self.write()?;
        Ok(with_held_job(&mut state, job_id, token, |job| {
            job.step_attempts += attempt_count - job.attempt_count;
            job.attempt_count = attempt_count;
            job.next_retry_at = next_retry_at;
            job.last_error = Some(last_error.to_string());
            job.status = JobStatus::Pending;
        }))
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        token: Uuid,
        attempt_count: i32,
        last_error: &str,
    ) -> StoreResult<bool> {
        let mut state = self.write()?;
        Ok(with_held_job(&mut state, job_id, token, |job| {
            job.step_attempts += attempt_count - job.attempt_count;
            job.attempt_count = attempt_count;
            job.next_retry_at = None;
            job.last_error = Some(last_error.to_string());
            job.status = JobStatus::Failed;
        }))
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        token: Uuid,
        outputs: &StepOutputs,
        artifact: &str,
        report: &AuditReport,
    ) -> StoreResult<bool> {
        let report = serde_json::to_value(report)?;
        let mut state = self.write()?;
        let mut scan_id = None;
        let matched = with_held_job(&mut state, job_id, token, |job| {
            job.outputs = outputs.clone();
            job.progress_percentage = 100;
            job.substep_label = "Complete".to_string();
            job.next_retry_at = None;
            job.last_error = None;
            job.status = JobStatus::Complete;
            scan_id = Some(job.scan_id);
        });

        if let Some(scan) = scan_id.and_then(|id| state.scans.get_mut(&id)) {
            if scan.status == ScanStatus::Pending {
                scan.status = ScanStatus::Complete;
                scan.artifact = Some(artifact.to_string());
                scan.audit_report = Some(report);
                scan.completed_at = Some(Utc::now());
            }
        }
        Ok(matched)
    }

    async fn cancel_job(&self, job_id: Uuid, reason: &str) -> StoreResult<bool> {
        let mut state = self.write()?;
        match state.jobs.get_mut(&job_id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = JobStatus::Failed;
                job.last_error = Some(reason.to_string());
                job.next_retry_at = None;
                job.lock_token = None;
                job.lock_acquired_at = None;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn seeded() -> (MemoryStore, Job) {
        let store = MemoryStore::new();
        let scan = store
            .create_scan(NewScan::new(Uuid::new_v4(), "acme.test", "Acme"))
            .await
            .unwrap();
        let job = store.create_job(scan.id).await.unwrap();
        (store, job)
    }

    #[tokio::test]
    async fn claim_is_exclusive_until_released() {
        let (store, job) = seeded().await;
        let now = Utc::now();
        let stale_before = now - Duration::seconds(300);

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let claimed = store.try_claim(job.id, first, now, stale_before).await.unwrap();
        assert!(claimed.is_some_and(|c| !c.reclaimed));
        assert!(store
            .try_claim(job.id, second, now, stale_before)
            .await
            .unwrap()
            .is_none());

        assert!(!store.release_lock(job.id, second).await.unwrap());
        assert!(store.release_lock(job.id, first).await.unwrap());

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.lock_token.is_none());
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimed_without_release() {
        let (store, job) = seeded().await;
        let then = Utc::now();
        store
            .try_claim(job.id, Uuid::new_v4(), then, then - Duration::seconds(300))
            .await
            .unwrap();

        let later = then + Duration::seconds(301);
        let claimed = store
            .try_claim(job.id, Uuid::new_v4(), later, later - Duration::seconds(300))
            .await
            .unwrap()
            .unwrap();
        assert!(claimed.reclaimed);
    }

    #[tokio::test]
    async fn progress_never_regresses() {
        let (store, job) = seeded().await;
        let now = Utc::now();
        store
            .try_claim(job.id, Uuid::new_v4(), now, now - Duration::seconds(300))
            .await
            .unwrap();

        assert!(store.report_progress(job.id, Step::Crawl, "a", 10).await.unwrap());
        assert!(!store.report_progress(job.id, Step::Crawl, "b", 5).await.unwrap());
        assert!(store.report_progress(job.id, Step::Crawl, "c", 10).await.unwrap());
        assert!(!store.report_progress(job.id, Step::Analyze, "d", 20).await.unwrap());

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.progress_percentage, 10);
        assert_eq!(job.substep_label, "c");
    }

    #[tokio::test]
    async fn transitions_require_the_current_token() {
        let (store, job) = seeded().await;
        let now = Utc::now();
        let token = Uuid::new_v4();
        store
            .try_claim(job.id, token, now, now - Duration::seconds(300))
            .await
            .unwrap();

        let outputs = StepOutputs::default();
        assert!(!store
            .advance_step(job.id, Uuid::new_v4(), Step::Analyze, &outputs, 15, "x")
            .await
            .unwrap());
        assert!(store
            .advance_step(job.id, token, Step::Analyze, &outputs, 15, "x")
            .await
            .unwrap());
        assert!(!store.fail_job(job.id, token, 0, "late").await.unwrap());
    }

    #[tokio::test]
    async fn cancel_only_affects_live_jobs() {
        let (store, job) = seeded().await;
        assert!(store.cancel_job(job.id, "cancelled").await.unwrap());
        assert!(!store.cancel_job(job.id, "again").await.unwrap());

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn artifact_versions_increase_per_project() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();
        let a = store.create_scan(NewScan::new(project, "a.test", "A")).await.unwrap();
        let b = store.create_scan(NewScan::new(project, "a.test", "A")).await.unwrap();
        let results = ScanResults {
            clusters: vec![],
            offsite: vec![],
            artifact: "# A".to_string(),
        };

        assert_eq!(store.save_scan_results(a.id, &results).await.unwrap(), 1);
        assert_eq!(store.save_scan_results(b.id, &results).await.unwrap(), 2);
        assert_eq!(store.latest_artifact_version(project).unwrap(), Some(2));
    }

    #[tokio::test]
    async fn saving_twice_for_one_scan_keeps_its_version() {
        let (store, job) = seeded().await;
        let first = ScanResults {
            clusters: vec![],
            offsite: vec![],
            artifact: "# first".to_string(),
        };
        let second = ScanResults {
            artifact: "# second".to_string(),
            ..first.clone()
        };

        assert_eq!(store.save_scan_results(job.scan_id, &first).await.unwrap(), 1);
        assert_eq!(store.save_scan_results(job.scan_id, &second).await.unwrap(), 1);
        let saved = store.saved_results(job.scan_id).unwrap().unwrap();
        assert_eq!(saved.artifact, "# second");
    }

    #[tokio::test]
    async fn complete_job_completes_the_scan_only_under_the_live_token() {
        let (store, job) = seeded().await;
        let now = Utc::now();
        let token = Uuid::new_v4();
        store
            .try_claim(job.id, token, now, now - Duration::seconds(300))
            .await
            .unwrap();
        let report = AuditReport::build("acme.test", "Acme", &[], now);
        let outputs = StepOutputs::default();

        assert!(!store
            .complete_job(job.id, Uuid::new_v4(), &outputs, "# Acme", &report)
            .await
            .unwrap());
        let scan = store.get_scan(job.scan_id).await.unwrap().unwrap();
        assert_eq!(scan.status, ScanStatus::Pending);
        assert!(scan.artifact.is_none());

        assert!(store
            .complete_job(job.id, token, &outputs, "# Acme", &report)
            .await
            .unwrap());
        let scan = store.get_scan(job.scan_id).await.unwrap().unwrap();
        assert_eq!(scan.status, ScanStatus::Complete);
        assert_eq!(scan.artifact.as_deref(), Some("# Acme"));
        assert!(scan.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancelled_job_cannot_complete_its_scan() {
        let (store, job) = seeded().await;
        let now = Utc::now();
        let token = Uuid::new_v4();
        store
            .try_claim(job.id, token, now, now - Duration::seconds(300))
            .await
            .unwrap();
        store.cancel_job(job.id, "cancelled by user").await.unwrap();
        store.mark_scan_failed(job.scan_id).await.unwrap();

        let report = AuditReport::build("acme.test", "Acme", &[], now);
        assert!(!store
            .complete_job(job.id, token, &StepOutputs::default(), "# Acme", &report)
            .await
            .unwrap());
        let scan = store.get_scan(job.scan_id).await.unwrap().unwrap();
        assert_eq!(scan.status, ScanStatus::Failed);
        assert!(scan.artifact.is_none());
    }
}
