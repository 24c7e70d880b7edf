//! PostgreSQL record store.
//!
//! Every lock-guarded write is one `UPDATE ... WHERE lock_token = $token`
//! statement, so two workers racing on the same row cannot both succeed.
//! The schema lives in the server's migrations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::collections::HashMap;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::traits::store::JobStore;
use crate::types::{
    job::{ClaimedJob, Job, JobStatus, Step},
    output::StepOutputs,
    report::AuditReport,
    scan::{NewScan, Scan, ScanResults, ScanStatus},
};

const JOB_COLUMNS: &str = "id, scan_id, status, current_step, substep_label, \
     progress_percentage, attempt_count, step_attempts, next_retry_at, last_error, \
     step_outputs, lock_token, lock_acquired_at, created_at, updated_at";

const SCAN_COLUMNS: &str = "id, project_id, domain, business_name, notification_recipient, \
     manual_urls, status, artifact, audit_report, created_at, completed_at";

/// PostgreSQL-backed job and scan store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect with a fresh pool.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    /// Reuse an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_job(&self, sql: &str, job_id: Uuid) -> StoreResult<Option<Job>> {
        sqlx::query_as::<_, JobRow>(sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .map(JobRow::into_job)
            .transpose()
    }
}

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    scan_id: Uuid,
    status: JobStatus,
    current_step: i16,
    substep_label: String,
    progress_percentage: i16,
    attempt_count: i32,
    step_attempts: i32,
    next_retry_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    step_outputs: serde_json::Value,
    lock_token: Option<Uuid>,
    lock_acquired_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self) -> StoreResult<Job> {
        let step = Step::from_index(self.current_step).ok_or_else(|| {
            StoreError::Database(format!("invalid step index {}", self.current_step).into())
        })?;
        let outputs: StepOutputs = serde_json::from_value(self.step_outputs)?;

        Ok(Job {
            id: self.id,
            scan_id: self.scan_id,
            status: self.status,
            step,
            substep_label: self.substep_label,
            progress_percentage: self.progress_percentage,
            attempt_count: self.attempt_count,
            step_attempts: self.step_attempts,
            next_retry_at: self.next_retry_at,
            last_error: self.last_error,
            outputs,
            lock_token: self.lock_token,
            lock_acquired_at: self.lock_acquired_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ClaimRow {
    #[sqlx(flatten)]
    job: JobRow,
    previous_token: Option<Uuid>,
}

#[derive(Debug, FromRow)]
struct ScanRow {
    id: Uuid,
    project_id: Uuid,
    domain: String,
    business_name: String,
    notification_recipient: Option<String>,
    manual_urls: Vec<String>,
    status: ScanStatus,
    artifact: Option<String>,
    audit_report: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl From<ScanRow> for Scan {
    fn from(row: ScanRow) -> Self {
        Scan {
            id: row.id,
            project_id: row.project_id,
            domain: row.domain,
            business_name: row.business_name,
            notification_recipient: row.notification_recipient,
            manual_urls: row.manual_urls,
            status: row.status,
            artifact: row.artifact,
            audit_report: row.audit_report,
            created_at: row.created_at,
            completed_at: row.completed_at,
        }
    }
}

// ============================================================================
// JobStore
// ============================================================================

#[async_trait]
impl JobStore for PostgresStore {
    #[instrument(skip(self, scan), fields(domain = %scan.domain))]
    async fn create_scan(&self, scan: NewScan) -> StoreResult<Scan> {
        let scan = scan.into_scan();
        let row = sqlx::query_as::<_, ScanRow>(&format!(
            r#"
            INSERT INTO scans (id, project_id, domain, business_name, notification_recipient, manual_urls, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {SCAN_COLUMNS}
            "#
        ))
        .bind(scan.id)
        .bind(scan.project_id)
        .bind(&scan.domain)
        .bind(&scan.business_name)
        .bind(&scan.notification_recipient)
        .bind(&scan.manual_urls)
        .bind(scan.status)
        .bind(scan.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn get_scan(&self, scan_id: Uuid) -> StoreResult<Option<Scan>> {
        let row = sqlx::query_as::<_, ScanRow>(&format!(
            "SELECT {SCAN_COLUMNS} FROM scans WHERE id = $1"
        ))
        .bind(scan_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Scan::from))
    }

    #[instrument(skip(self, results), fields(clusters = results.clusters.len()))]
    async fn save_scan_results(&self, scan_id: Uuid, results: &ScanResults) -> StoreResult<i32> {
        let mut tx = self.pool.begin().await?;

        let project_id: Option<(Uuid,)> = sqlx::query_as("SELECT project_id FROM scans WHERE id = $1")
            .bind(scan_id)
            .fetch_optional(&mut *tx)
            .await?;
        let (project_id,) = project_id.ok_or(StoreError::NotFound {
            entity: "scan",
            id: scan_id,
        })?;

        // A re-run of finalize replaces the previous attempt's rows.
        sqlx::query("DELETE FROM scan_clusters WHERE scan_id = $1")
            .bind(scan_id)
            .execute(&mut *tx)
            .await?;

        let mut cluster_ids: HashMap<&str, Uuid> = HashMap::new();
        for cluster in &results.clusters {
            let cluster_id = Uuid::now_v7();
            sqlx::query(
                r#"
                INSERT INTO scan_clusters (id, scan_id, topic, keywords, relevance, total_score)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(cluster_id)
            .bind(scan_id)
            .bind(&cluster.topic.name)
            .bind(serde_json::to_value(&cluster.topic.keywords)?)
            .bind(cluster.relevance)
            .bind(cluster.score.total as i16)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO scan_hub_pages (id, cluster_id, url, title, total_score, dimensions)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(cluster_id)
            .bind(&cluster.hub_url)
            .bind(&cluster.hub_title)
            .bind(cluster.score.total as i16)
            .bind(serde_json::to_value(&cluster.score.dimensions)?)
            .execute(&mut *tx)
            .await?;

            cluster_ids.insert(cluster.topic.name.as_str(), cluster_id);
        }

        for group in &results.offsite {
            let Some(cluster_id) = cluster_ids.get(group.topic.as_str()) else {
                warn!(topic = %group.topic, "off-site items for unknown cluster, skipping");
                continue;
            };
            for item in &group.items {
                sqlx::query(
                    r#"
                    INSERT INTO scan_offsite_content (id, cluster_id, url, title, snippet, platform, source, scores, total_score)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    "#,
                )
                .bind(Uuid::now_v7())
                .bind(cluster_id)
                .bind(&item.url)
                .bind(&item.title)
                .bind(&item.snippet)
                .bind(&item.platform)
                .bind(item.source.as_str())
                .bind(serde_json::to_value(item.scores)?)
                .bind(item.total as i16)
                .execute(&mut *tx)
                .await?;
            }
        }

        let existing: Option<(i32,)> = sqlx::query_as(
            "UPDATE artifact_versions SET content = $2 WHERE scan_id = $1 RETURNING version",
        )
        .bind(scan_id)
        .bind(&results.artifact)
        .fetch_optional(&mut *tx)
        .await?;

        let version = match existing {
            Some((version,)) => version,
            None => {
                let (version,): (i32,) = sqlx::query_as(
                    r#"
                    INSERT INTO artifact_versions (id, project_id, scan_id, version, content)
                    SELECT $1, $2, $3, COALESCE(MAX(version), 0) + 1, $4
                    FROM artifact_versions WHERE project_id = $2
                    RETURNING version
                    "#,
                )
                .bind(Uuid::now_v7())
                .bind(project_id)
                .bind(scan_id)
                .bind(&results.artifact)
                .fetch_one(&mut *tx)
                .await?;
                version
            }
        };

        tx.commit().await?;
        debug!(%scan_id, version, "saved scan results");
        Ok(version)
    }

    #[instrument(skip(self))]
    async fn mark_scan_failed(&self, scan_id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE scans SET status = 'failed' WHERE id = $1 AND status <> 'complete'")
            .bind(scan_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_job(&self, scan_id: Uuid) -> StoreResult<Job> {
        let job = Job::new(scan_id);
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            INSERT INTO scan_jobs (id, scan_id, status, current_step, substep_label, progress_percentage, step_outputs, created_at, updated_at)
            VALUES ($1, $2, 'pending', 0, $3, 0, '{{}}'::jsonb, $4, $4)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.id)
        .bind(scan_id)
        .bind(&job.substep_label)
        .bind(job.created_at)
        .fetch_one(&self.pool)
        .await?;

        row.into_job()
    }

    #[instrument(skip(self))]
    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<Job>> {
        self.fetch_job(&format!("SELECT {JOB_COLUMNS} FROM scan_jobs WHERE id = $1"), job_id)
            .await
    }

    #[instrument(skip(self))]
    async fn find_job_for_scan(&self, scan_id: Uuid) -> StoreResult<Option<Job>> {
        self.fetch_job(
            &format!(
                "SELECT {JOB_COLUMNS} FROM scan_jobs WHERE scan_id = $1 ORDER BY created_at DESC LIMIT 1"
            ),
            scan_id,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn find_eligible(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM scan_jobs
            WHERE status IN ('pending', 'processing')
              AND (
                (lock_token IS NULL AND status = 'pending'
                    AND (next_retry_at IS NULL OR next_retry_at <= $1))
                OR (lock_token IS NOT NULL
                    AND (lock_acquired_at IS NULL OR lock_acquired_at < $2))
              )
            ORDER BY created_at, id
            LIMIT $3
            "#
        ))
        .bind(now)
        .bind(stale_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    #[instrument(skip(self, token))]
    async fn try_claim(
        &self,
        job_id: Uuid,
        token: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<ClaimedJob>> {
        // Self-join exposes the pre-update lock token so a stale takeover
        // can be told apart from a clean claim.
        let returning = JOB_COLUMNS
            .split(", ")
            .map(|c| format!("j.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let row = sqlx::query_as::<_, ClaimRow>(&format!(
            r#"
            UPDATE scan_jobs j
            SET lock_token = $2, lock_acquired_at = $3, status = 'processing', updated_at = $3
            FROM scan_jobs prev
            WHERE j.id = $1
              AND prev.id = j.id
              AND j.status IN ('pending', 'processing')
              AND (
                (j.lock_token IS NULL AND j.status = 'pending'
                    AND (j.next_retry_at IS NULL OR j.next_retry_at <= $3))
                OR (j.lock_token IS NOT NULL
                    AND (j.lock_acquired_at IS NULL OR j.lock_acquired_at < $4))
              )
            RETURNING {returning}, prev.lock_token AS previous_token
            "#
        ))
        .bind(job_id)
        .bind(token)
        .bind(now)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let reclaimed = row.previous_token.is_some();
                Ok(Some(ClaimedJob {
                    job: row.job.into_job()?,
                    token,
                    reclaimed,
                }))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, token))]
    async fn release_lock(&self, job_id: Uuid, token: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET lock_token = NULL,
                lock_acquired_at = NULL,
                status = CASE WHEN status = 'processing' THEN 'pending'::scan_job_status ELSE status END,
                updated_at = NOW()
            WHERE id = $1 AND lock_token = $2
            "#,
        )
        .bind(job_id)
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn report_progress(
        &self,
        job_id: Uuid,
        step: Step,
        label: &str,
        percentage: i16,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET substep_label = $3, progress_percentage = $4, updated_at = NOW()
            WHERE id = $1
              AND current_step = $2
              AND status = 'processing'
              AND progress_percentage <= $4
            "#,
        )
        .bind(job_id)
        .bind(step.index())
        .bind(label)
        .bind(percentage)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, token, outputs))]
    async fn advance_step(
        &self,
        job_id: Uuid,
        token: Uuid,
        next_step: Step,
        outputs: &StepOutputs,
        percentage: i16,
        label: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET current_step = GREATEST(current_step, $3),
                step_outputs = $4,
                progress_percentage = GREATEST(progress_percentage, $5),
                substep_label = $6,
                step_attempts = 0,
                next_retry_at = NULL,
                last_error = NULL,
                status = 'pending',
                lock_token = NULL,
                lock_acquired_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND lock_token = $2 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(token)
        .bind(next_step.index())
        .bind(serde_json::to_value(outputs)?)
        .bind(percentage)
        .bind(label)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, token, last_error))]
    async fn schedule_retry(
        &self,
        job_id: Uuid,
        token: Uuid,
        attempt_count: i32,
        next_retry_at: Option<DateTime<Utc>>,
        last_error: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET step_attempts = step_attempts + ($3 - attempt_count),
                attempt_count = $3,
                next_retry_at = $4,
                last_error = $5,
                status = 'pending',
                lock_token = NULL,
                lock_acquired_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND lock_token = $2 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(token)
        .bind(attempt_count)
        .bind(next_retry_at)
        .bind(last_error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, token, last_error))]
    async fn fail_job(
        &self,
        job_id: Uuid,
        token: Uuid,
        attempt_count: i32,
        last_error: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET step_attempts = step_attempts + ($3 - attempt_count),
                attempt_count = $3,
                next_retry_at = NULL,
                last_error = $4,
                status = 'failed',
                lock_token = NULL,
                lock_acquired_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND lock_token = $2 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(token)
        .bind(attempt_count)
        .bind(last_error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, token, outputs, artifact, report))]
    async fn complete_job(
        &self,
        job_id: Uuid,
        token: Uuid,
        outputs: &StepOutputs,
        artifact: &str,
        report: &AuditReport,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let scan_id: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE scan_jobs
            SET step_outputs = $3,
                progress_percentage = 100,
                substep_label = 'Complete',
                next_retry_at = NULL,
                last_error = NULL,
                status = 'complete',
                lock_token = NULL,
                lock_acquired_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND lock_token = $2 AND status = 'processing'
            RETURNING scan_id
            "#,
        )
        .bind(job_id)
        .bind(token)
        .bind(serde_json::to_value(outputs)?)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((scan_id,)) = scan_id else {
            tx.rollback().await?;
            return Ok(false);
        };

        sqlx::query(
            r#"
            UPDATE scans
            SET status = 'complete', artifact = $2, audit_report = $3, completed_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(scan_id)
        .bind(artifact)
        .bind(serde_json::to_value(report)?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn cancel_job(&self, job_id: Uuid, reason: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET status = 'failed',
                last_error = $2,
                next_retry_at = NULL,
                lock_token = NULL,
                lock_acquired_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(job_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
