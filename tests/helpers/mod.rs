//! Test helper utilities: fake handlers and an instrumented store.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guild_jobs::models::job::{Job, JobStatus, NewJob, QueueStats};
use guild_jobs::services::handler::{HandlerError, JobHandler};
use guild_jobs::services::memory_store::MemoryJobStore;
use guild_jobs::services::queue::{JobStore, StoreError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

/// Records the ids of jobs it handled, in order, and succeeds.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    pub seen: Arc<Mutex<Vec<Uuid>>>,
}

impl RecordingHandler {
    pub fn seen(&self) -> Vec<Uuid> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobHandler for RecordingHandler {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(job.id);
        Ok(())
    }
}

/// Always fails with the given message.
pub struct FailingHandler(pub &'static str);

#[async_trait]
impl JobHandler for FailingHandler {
    async fn handle(&self, _job: &Job) -> Result<(), HandlerError> {
        Err(HandlerError::failed(self.0))
    }
}

pub struct PanickingHandler;

#[async_trait]
impl JobHandler for PanickingHandler {
    async fn handle(&self, _job: &Job) -> Result<(), HandlerError> {
        panic!("sheet exploded");
    }
}

/// Sleeps longer than any reasonable deadline.
pub struct HangingHandler;

#[async_trait]
impl JobHandler for HangingHandler {
    async fn handle(&self, _job: &Job) -> Result<(), HandlerError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

/// Looks the job up in the store while running, to observe its status
/// mid-flight.
pub struct ObservingHandler {
    pub store: Arc<MemoryJobStore>,
    pub observed: Arc<Mutex<Vec<JobStatus>>>,
}

#[async_trait]
impl JobHandler for ObservingHandler {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        let current = self
            .store
            .get(job.id)
            .await
            .map_err(|e| HandlerError::failed(e.to_string()))?
            .ok_or_else(|| HandlerError::failed("job vanished"))?;
        self.observed.lock().unwrap().push(current.status);
        Ok(())
    }
}

/// Signals when it starts, then waits to be released.
#[derive(Clone, Default)]
pub struct GatedHandler {
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[async_trait]
impl JobHandler for GatedHandler {
    async fn handle(&self, _job: &Job) -> Result<(), HandlerError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

/// Memory store that timestamps every claim and can fail the first few
/// claims, completion writes or failure-with-retry writes.
pub struct InstrumentedStore {
    pub inner: MemoryJobStore,
    pub claim_times: Mutex<Vec<Instant>>,
    failing_claims: AtomicUsize,
    failing_completions: AtomicUsize,
    failing_retries: AtomicUsize,
}

/// Consume one injected failure, if any are left.
fn take_failure(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn pool_timeout() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

impl InstrumentedStore {
    pub fn new() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(claims: usize) -> Self {
        Self {
            inner: MemoryJobStore::new(),
            claim_times: Mutex::new(Vec::new()),
            failing_claims: AtomicUsize::new(claims),
            failing_completions: AtomicUsize::new(0),
            failing_retries: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` `mark_completed` calls; `usize::MAX` fails them all.
    pub fn with_failing_completions(self, n: usize) -> Self {
        self.failing_completions.store(n, Ordering::SeqCst);
        self
    }

    /// Fail the next `n` `fail_and_retry` calls before they touch the data.
    pub fn with_failing_retries(self, n: usize) -> Self {
        self.failing_retries.store(n, Ordering::SeqCst);
        self
    }

    pub fn claim_times(&self) -> Vec<Instant> {
        self.claim_times.lock().unwrap().clone()
    }

    /// Gaps between consecutive claims.
    pub fn claim_gaps(&self) -> Vec<Duration> {
        self.claim_times()
            .windows(2)
            .map(|w| w[1].duration_since(w[0]))
            .collect()
    }
}

#[async_trait]
impl JobStore for InstrumentedStore {
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError> {
        self.inner.enqueue(job).await
    }

    async fn fail_and_retry(
        &self,
        failed: &Job,
        error: &str,
        run_after: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        if take_failure(&self.failing_retries) {
            return Err(pool_timeout());
        }
        self.inner.fail_and_retry(failed, error, run_after).await
    }

    async fn claim_next(&self) -> Result<Option<Job>, StoreError> {
        self.claim_times.lock().unwrap().push(Instant::now());
        if take_failure(&self.failing_claims) {
            return Err(pool_timeout());
        }
        self.inner.claim_next().await
    }

    async fn mark_completed(&self, job_id: Uuid) -> Result<(), StoreError> {
        if take_failure(&self.failing_completions) {
            return Err(pool_timeout());
        }
        self.inner.mark_completed(job_id).await
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<(), StoreError> {
        self.inner.mark_failed(job_id, error).await
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        self.inner.get(job_id).await
    }

    async fn list_by_status(&self, status: JobStatus, limit: i64) -> Result<Vec<Job>, StoreError> {
        self.inner.list_by_status(status, limit).await
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        self.inner.stats().await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

pub fn job(job_type: &str) -> NewJob {
    NewJob::new(job_type, serde_json::json!({ "guild_id": "g-1" }))
}
