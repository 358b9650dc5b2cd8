use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use scriptflow_common::{JobRecord, JobStatus};

use crate::traits::JobRepo;
use crate::PgStore;

type JobRow = (
    Uuid,                  // job_id
    String,                // subscriber_id
    String,                // request_hash
    serde_json::Value,     // payload
    String,                // status
    i32,                   // priority
    i32,                   // attempts
    i32,                   // max_attempts
    Option<String>,        // error
    Option<Uuid>,          // result_script_id
    Option<DateTime<Utc>>, // heartbeat_at
    Option<DateTime<Utc>>, // started_at
    Option<DateTime<Utc>>, // completed_at
    DateTime<Utc>,         // created_at
);

const JOB_COLUMNS: &str = "job_id, subscriber_id, request_hash, payload, status, priority, \
     attempts, max_attempts, error, result_script_id, heartbeat_at, started_at, completed_at, \
     created_at";

fn row_to_job(row: JobRow) -> Result<JobRecord> {
    Ok(JobRecord {
        job_id: row.0,
        subscriber_id: row.1,
        request_hash: row.2,
        payload: serde_json::from_value(row.3)?,
        status: JobStatus::parse(&row.4).ok_or_else(|| anyhow!("unknown job status {}", row.4))?,
        priority: row.5,
        attempts: row.6,
        max_attempts: row.7,
        error: row.8,
        result_script_id: row.9,
        heartbeat_at: row.10,
        started_at: row.11,
        completed_at: row.12,
        created_at: row.13,
    })
}

#[async_trait]
impl JobRepo for PgStore {
    async fn insert_queued(&self, job: &JobRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (job_id, subscriber_id, request_hash, payload, status, priority,
                attempts, max_attempts, created_at)
            VALUES ($1, $2, $3, $4, 'queued', $5, 0, $6, $7)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(job.job_id)
        .bind(&job.subscriber_id)
        .bind(&job.request_hash)
        .bind(serde_json::to_value(&job.payload)?)
        .bind(job.priority)
        .bind(job.max_attempts)
        .bind(job.created_at)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_job(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1"))
                .bind(job_id)
                .fetch_optional(self.pool())
                .await?;
        row.map(row_to_job).transpose()
    }

    async fn find_active_by_request_hash(&self, request_hash: &str) -> Result<Option<JobRecord>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE request_hash = $1 AND status IN ('queued', 'processing') \
             ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(request_hash)
        .fetch_optional(self.pool())
        .await?;
        row.map(row_to_job).transpose()
    }

    async fn claim_next(&self) -> Result<Option<JobRecord>> {
        // SKIP LOCKED keeps concurrent workers from claiming the same row.
        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE jobs
            SET status = 'processing', started_at = now(), heartbeat_at = now(),
                attempts = attempts + 1
            WHERE job_id = (
                SELECT job_id FROM jobs WHERE status = 'queued'
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .fetch_optional(self.pool())
        .await?;
        row.map(row_to_job).transpose()
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE jobs SET heartbeat_at = now() WHERE job_id = $1 AND status = 'processing'")
            .bind(job_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn mark_completed(&self, job_id: Uuid, script_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'completed', completed_at = now(), result_script_id = $2, \
             error = NULL WHERE job_id = $1 AND status = 'processing'",
        )
        .bind(job_id)
        .bind(script_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', completed_at = now(), error = $2 \
             WHERE job_id = $1 AND status = 'processing'",
        )
        .bind(job_id)
        .bind(error)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn requeue(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'queued', heartbeat_at = NULL, error = $2 \
             WHERE job_id = $1 AND status = 'processing'",
        )
        .bind(job_id)
        .bind(error)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn recover_stalled(&self, stale_after: Duration) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET status = 'queued', heartbeat_at = NULL, error = 'stalled: heartbeat lapsed'
            WHERE status = 'processing'
              AND heartbeat_at < now() - make_interval(secs => $1)
            RETURNING job_id
            "#,
        )
        .bind(stale_after.as_secs_f64())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn delete_terminal_older_than(&self, horizon: Duration) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('completed', 'failed') \
             AND completed_at < now() - make_interval(secs => $1)",
        )
        .bind(horizon.as_secs_f64())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    async fn queue_depth(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT count(*) FROM jobs WHERE status = 'queued'")
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }

    async fn count_processing(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT count(*) FROM jobs WHERE status = 'processing'")
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }
}
