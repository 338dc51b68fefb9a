use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus, NewJob, QueueStats};
use crate::services::queue::{JobStore, StoreError};

const JOB_COLUMNS: &str = "id, type, payload, priority, attempts, max_attempts, status, run_after, \
     retry_of, created_at, updated_at, processed_at, last_error";

const MARK_FAILED_SQL: &str = r#"
    UPDATE queue_jobs
    SET status = 'failed',
        last_error = $2,
        processed_at = NOW(),
        updated_at = NOW()
    WHERE id = $1 AND status IN ('processing', 'failed')
"#;

/// PostgreSQL-backed job store over the `queue_jobs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find out why a guarded status update touched no rows.
    async fn explain_rejected(&self, job_id: Uuid, to: JobStatus) -> StoreError {
        match self.get(job_id).await {
            Ok(Some(job)) => StoreError::InvalidTransition {
                id: job_id,
                from: job.status,
                to,
            },
            Ok(None) => StoreError::NotFound(job_id),
            Err(e) => e,
        }
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str).map_err(|e| sqlx::Error::ColumnDecode {
        index: "status".to_string(),
        source: Box::new(e),
    })?;

    Ok(Job {
        id: row.try_get("id")?,
        job_type: row.try_get("type")?,
        payload: row.try_get("payload")?,
        priority: row.try_get("priority")?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        status,
        run_after: row.try_get("run_after")?,
        retry_of: row.try_get("retry_of")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        processed_at: row.try_get("processed_at")?,
        last_error: row.try_get("last_error")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO queue_jobs (type, payload, priority, max_attempts, run_after, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.priority)
        .bind(job.max_attempts)
        .bind(job.run_after)
        .fetch_one(&self.pool)
        .await?;

        Ok(job_from_row(&row)?)
    }

    async fn fail_and_retry(
        &self,
        failed: &Job,
        error: &str,
        run_after: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(MARK_FAILED_SQL)
            .bind(failed.id)
            .bind(error)
            .execute(&mut *tx)
            .await?;
        if marked.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.explain_rejected(failed.id, JobStatus::Failed).await);
        }

        let existing = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM queue_jobs WHERE retry_of = $1"
        ))
        .bind(failed.id)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match existing {
            Some(row) => row,
            None => {
                sqlx::query(&format!(
                    r#"
                    INSERT INTO queue_jobs (type, payload, priority, attempts, max_attempts, run_after, retry_of, status)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
                    RETURNING {JOB_COLUMNS}
                    "#
                ))
                .bind(&failed.job_type)
                .bind(&failed.payload)
                .bind(failed.priority)
                .bind(failed.attempts)
                .bind(failed.max_attempts)
                .bind(run_after)
                .bind(failed.id)
                .fetch_one(&mut *tx)
                .await?
            }
        };
        let retry = job_from_row(&row)?;

        tx.commit().await?;
        Ok(retry)
    }

    async fn claim_next(&self) -> Result<Option<Job>, StoreError> {
        // Select, lock and mark in one statement. SKIP LOCKED lets racing
        // workers pass over a row another claimer already holds.
        let row = sqlx::query(&format!(
            r#"
            UPDATE queue_jobs
            SET status = 'processing',
                attempts = attempts + 1,
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM queue_jobs
                WHERE status = 'pending'
                  AND (run_after IS NULL OR run_after <= NOW())
                ORDER BY priority ASC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(job_from_row).transpose()?)
    }

    async fn mark_completed(&self, job_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET status = 'completed',
                last_error = NULL,
                processed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('processing', 'completed')
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.explain_rejected(job_id, JobStatus::Completed).await);
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<(), StoreError> {
        let result = sqlx::query(MARK_FAILED_SQL)
            .bind(job_id)
            .bind(error)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(self.explain_rejected(job_id, JobStatus::Failed).await);
        }
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM queue_jobs WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(job_from_row).transpose()?)
    }

    async fn list_by_status(&self, status: JobStatus, limit: i64) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM queue_jobs
            WHERE status = $1
            ORDER BY priority ASC, created_at ASC
            LIMIT $2
            "#
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(job_from_row).collect::<Result<_, _>>()?)
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM queue_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            match JobStatus::from_str(&status) {
                Ok(status) => stats.add(status, count),
                Err(_) => tracing::warn!(status = %status, "Unknown job status in queue_jobs"),
            }
        }
        Ok(stats)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
