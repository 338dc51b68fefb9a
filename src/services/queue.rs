use async_trait::async_trait;
use chrono::{DateTime, Utc};
use garde::Validate;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::job::{Job, JobHandle, JobStatus, NewJob, QueueStats};

/// Durable storage for queue jobs with an atomic claim primitive.
///
/// Implementations must guarantee that concurrent `claim_next` callers never
/// receive the same job, and that a job's status only moves forward along
/// `pending -> processing -> completed | failed`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a pending job with zero attempts.
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError>;

    /// Mark `failed` as failed and insert its pending retry as one write.
    ///
    /// The retry carries the attempt count over and points back through
    /// `retry_of`. Repeating the call for the same job returns the retry that
    /// already exists instead of inserting another.
    async fn fail_and_retry(
        &self,
        failed: &Job,
        error: &str,
        run_after: DateTime<Utc>,
    ) -> Result<Job, StoreError>;

    /// Claim the next eligible job: lowest priority value first, oldest first.
    async fn claim_next(&self) -> Result<Option<Job>, StoreError>;

    async fn mark_completed(&self, job_id: Uuid) -> Result<(), StoreError>;

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<(), StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    async fn list_by_status(&self, status: JobStatus, limit: i64) -> Result<Vec<Job>, StoreError>;

    async fn stats(&self) -> Result<QueueStats, StoreError>;

    /// Release any pooled connections. Further calls fail.
    async fn close(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job store is closed")]
    Closed,
}

impl StoreError {
    /// Whether repeating the same write could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

/// Validating front door for job submission and inspection.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Validate and enqueue a job.
    pub async fn enqueue(&self, mut job: NewJob) -> Result<JobHandle, QueueError> {
        job.job_type = job.job_type.trim().to_string();
        if job.payload.is_null() {
            job.payload = JsonValue::Object(Default::default());
        }

        job.validate()
            .map_err(|e| QueueError::Validation(e.to_string()))?;
        if !job.payload.is_object() {
            return Err(QueueError::Validation(
                "payload must be a JSON object".to_string(),
            ));
        }

        let created = self.store.enqueue(job).await?;

        metrics::counter!("queue_jobs_enqueued_total", "job_type" => created.job_type.clone())
            .increment(1);
        tracing::info!(
            job_id = %created.id,
            job_type = %created.job_type,
            priority = created.priority,
            "Job enqueued"
        );

        Ok(JobHandle { id: created.id })
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.store.get(job_id).await?)
    }

    pub async fn list_by_status(
        &self,
        status: JobStatus,
        limit: i64,
    ) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.list_by_status(status, limit).await?)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let stats = self.store.stats().await?;
        metrics::gauge!("queue_depth").set(stats.pending as f64);
        Ok(stats)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Invalid job: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
