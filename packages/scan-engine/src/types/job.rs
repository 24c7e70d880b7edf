//! Job model - the durable, resumable unit of scan processing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::output::StepOutputs;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "scan_job_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Complete,
    Failed,
}

impl JobStatus {
    /// `complete` and `failed` are never left once entered.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed, ordered pipeline stages.
///
/// Adding or removing a stage is a compile-time change: every `match` over
/// `Step` (executor lookup, progress bands) must be updated with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Crawl,
    Analyze,
    Discover,
    Finalize,
}

impl Step {
    pub const ALL: [Step; 4] = [Step::Crawl, Step::Analyze, Step::Discover, Step::Finalize];

    pub fn index(&self) -> i16 {
        match self {
            Step::Crawl => 0,
            Step::Analyze => 1,
            Step::Discover => 2,
            Step::Finalize => 3,
        }
    }

    pub fn from_index(index: i16) -> Option<Self> {
        match index {
            0 => Some(Step::Crawl),
            1 => Some(Step::Analyze),
            2 => Some(Step::Discover),
            3 => Some(Step::Finalize),
            _ => None,
        }
    }

    /// The step that follows this one, or `None` after Finalize.
    pub fn next(&self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    /// Progress percentage at which this step begins.
    pub fn start_percent(&self) -> i16 {
        match self {
            Step::Crawl => 0,
            Step::Analyze => 15,
            Step::Discover => 55,
            Step::Finalize => 80,
        }
    }

    /// Progress percentage persisted when this step succeeds.
    pub fn end_percent(&self) -> i16 {
        match self.next() {
            Some(next) => next.start_percent(),
            None => 100,
        }
    }

    /// Map a 0.0..=1.0 fraction of work inside this step onto its band.
    ///
    /// Never reaches `end_percent`; only a successful step may claim that.
    pub fn percent_at(&self, fraction: f64) -> i16 {
        let start = self.start_percent();
        let span = self.end_percent() - start;
        let fraction = fraction.clamp(0.0, 1.0);
        let within = ((span as f64) * fraction).floor() as i16;
        start + within.min(span - 1)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Crawl => "crawl",
            Step::Analyze => "analyze",
            Step::Discover => "discover",
            Step::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub scan_id: Uuid,
    pub status: JobStatus,
    pub step: Step,
    pub substep_label: String,
    pub progress_percentage: i16,

    // Retry bookkeeping
    /// Failed attempts over the whole job lifetime; drives the retry policy.
    pub attempt_count: i32,
    /// Failed attempts at the current step; reset on advance.
    pub step_attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,

    pub outputs: StepOutputs,

    // Lock (embedded, not a separate entity)
    pub lock_token: Option<Uuid>,
    pub lock_acquired_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A fresh job for a newly requested scan.
    pub fn new(scan_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            scan_id,
            status: JobStatus::Pending,
            step: Step::Crawl,
            substep_label: "Queued".to_string(),
            progress_percentage: 0,
            attempt_count: 0,
            step_attempts: 0,
            next_retry_at: None,
            last_error: None,
            outputs: StepOutputs::default(),
            lock_token: None,
            lock_acquired_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the poller may pick this job up at `now`.
    ///
    /// Either pending and due with no lock, or holding a lock acquired before
    /// `stale_before` (its worker is presumed dead).
    pub fn is_eligible(&self, now: DateTime<Utc>, stale_before: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        match (self.lock_token, self.lock_acquired_at) {
            (Some(_), Some(acquired_at)) => acquired_at < stale_before,
            (Some(_), None) => true,
            (None, _) => {
                self.status == JobStatus::Pending
                    && self.next_retry_at.map_or(true, |at| at <= now)
            }
        }
    }

    /// The read shape a polling client consumes.
    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.id,
            scan_id: self.scan_id,
            status: self.status,
            current_step: self.step,
            current_step_index: self.step.index(),
            substep_label: self.substep_label.clone(),
            progress_percentage: self.progress_percentage,
            retry_state: RetryState {
                attempt: self.attempt_count,
                next_retry_at: self.next_retry_at,
            },
            last_error: self.last_error.clone(),
        }
    }
}

/// A job whose lock was just acquired by this worker.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: Job,
    pub token: Uuid,
    /// The previous holder's lock had gone stale and was taken over.
    pub reclaimed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryState {
    pub attempt: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Status exposed to polling clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub scan_id: Uuid,
    pub status: JobStatus,
    pub current_step: Step,
    pub current_step_index: i16,
    pub substep_label: String,
    pub progress_percentage: i16,
    pub retry_state: RetryState,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn new_job_starts_pending_at_crawl() {
        let job = Job::new(Uuid::new_v4());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.step, Step::Crawl);
        assert_eq!(job.progress_percentage, 0);
        assert_eq!(job.attempt_count, 0);
        assert!(job.lock_token.is_none());
    }

    #[test]
    fn step_order_is_fixed() {
        assert_eq!(Step::Crawl.next(), Some(Step::Analyze));
        assert_eq!(Step::Analyze.next(), Some(Step::Discover));
        assert_eq!(Step::Discover.next(), Some(Step::Finalize));
        assert_eq!(Step::Finalize.next(), None);
        for step in Step::ALL {
            assert_eq!(Step::from_index(step.index()), Some(step));
        }
        assert_eq!(Step::from_index(4), None);
    }

    #[test]
    fn progress_bands_are_contiguous() {
        assert_eq!(Step::Crawl.end_percent(), 15);
        assert_eq!(Step::Analyze.end_percent(), 55);
        assert_eq!(Step::Discover.end_percent(), 80);
        assert_eq!(Step::Finalize.end_percent(), 100);
        for step in Step::ALL {
            if let Some(next) = step.next() {
                assert_eq!(step.end_percent(), next.start_percent());
            }
        }
    }

    #[test]
    fn percent_at_stays_inside_band() {
        assert_eq!(Step::Crawl.percent_at(0.0), 0);
        assert_eq!(Step::Crawl.percent_at(1.0), 14);
        assert_eq!(Step::Analyze.percent_at(0.5), 35);
        assert_eq!(Step::Finalize.percent_at(7.0), 99);
    }

    #[test]
    fn terminal_jobs_are_never_eligible() {
        let now = Utc::now();
        let mut job = Job::new(Uuid::new_v4());
        job.status = JobStatus::Complete;
        assert!(!job.is_eligible(now, now));
        job.status = JobStatus::Failed;
        assert!(!job.is_eligible(now, now));
    }

    #[test]
    fn future_retry_is_not_eligible_yet() {
        let now = Utc::now();
        let mut job = Job::new(Uuid::new_v4());
        job.next_retry_at = Some(now + Duration::minutes(5));
        assert!(!job.is_eligible(now, now - Duration::minutes(5)));
        assert!(job.is_eligible(now + Duration::minutes(6), now));
    }

    #[test]
    fn live_lock_blocks_and_stale_lock_allows() {
        let now = Utc::now();
        let mut job = Job::new(Uuid::new_v4());
        job.status = JobStatus::Processing;
        job.lock_token = Some(Uuid::new_v4());
        job.lock_acquired_at = Some(now - Duration::seconds(30));

        let stale_before = now - Duration::seconds(300);
        assert!(!job.is_eligible(now, stale_before));

        job.lock_acquired_at = Some(now - Duration::seconds(301));
        assert!(job.is_eligible(now, stale_before));
    }

    #[test]
    fn status_view_carries_retry_state() {
        let mut job = Job::new(Uuid::new_v4());
        job.attempt_count = 3;
        job.next_retry_at = Some(Utc::now());
        job.last_error = Some("rate limited".to_string());

        let view = job.status_view();
        assert_eq!(view.retry_state.attempt, 3);
        assert_eq!(view.retry_state.next_retry_at, job.next_retry_at);
        assert_eq!(view.current_step_index, 0);
        assert_eq!(view.last_error.as_deref(), Some("rate limited"));
    }
}
