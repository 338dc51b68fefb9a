use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::models::job::{Job, JobStatus, NewJob, QueueStats};
use crate::services::queue::{JobStore, StoreError};

/// In-process job store.
///
/// Claiming selects and marks a job under one lock guard, which gives the
/// same exclusivity as `FOR UPDATE SKIP LOCKED` for workers sharing the
/// process. Jobs are kept in insertion order so that ties on `created_at`
/// resolve oldest-first.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<Job>>,
    closed: AtomicBool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Copy of every job, readable even after the store is closed.
    pub fn snapshot(&self) -> Vec<Job> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Job>>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(self.jobs.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn insert(&self, job: Job) -> Result<Job, StoreError> {
        let mut jobs = self.lock()?;
        jobs.push(job.clone());
        Ok(job)
    }

    fn transition(
        &self,
        job_id: Uuid,
        to: JobStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.lock()?;
        apply_transition(&mut jobs, job_id, to, error)
    }
}

fn apply_transition(
    jobs: &mut [Job],
    job_id: Uuid,
    to: JobStatus,
    error: Option<&str>,
) -> Result<(), StoreError> {
    let job = jobs
        .iter_mut()
        .find(|j| j.id == job_id)
        .ok_or(StoreError::NotFound(job_id))?;

    if !job.status.can_transition_to(to) {
        return Err(StoreError::InvalidTransition {
            id: job_id,
            from: job.status,
            to,
        });
    }

    let now = Utc::now();
    job.status = to;
    job.last_error = error.map(str::to_string);
    job.processed_at = Some(now);
    job.updated_at = now;
    Ok(())
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, new_job: NewJob) -> Result<Job, StoreError> {
        let now = Utc::now();
        self.insert(Job {
            id: Uuid::new_v4(),
            job_type: new_job.job_type,
            payload: new_job.payload,
            priority: new_job.priority,
            attempts: 0,
            max_attempts: new_job.max_attempts,
            status: JobStatus::Pending,
            run_after: new_job.run_after,
            retry_of: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            last_error: None,
        })
    }

    async fn fail_and_retry(
        &self,
        failed: &Job,
        error: &str,
        run_after: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let mut jobs = self.lock()?;
        apply_transition(&mut jobs, failed.id, JobStatus::Failed, Some(error))?;

        if let Some(existing) = jobs.iter().find(|j| j.retry_of == Some(failed.id)) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let retry = Job {
            id: Uuid::new_v4(),
            job_type: failed.job_type.clone(),
            payload: failed.payload.clone(),
            priority: failed.priority,
            attempts: failed.attempts,
            max_attempts: failed.max_attempts,
            status: JobStatus::Pending,
            run_after: Some(run_after),
            retry_of: Some(failed.id),
            created_at: now,
            updated_at: now,
            processed_at: None,
            last_error: None,
        };
        jobs.push(retry.clone());
        Ok(retry)
    }

    async fn claim_next(&self) -> Result<Option<Job>, StoreError> {
        let now = Utc::now();
        let mut jobs = self.lock()?;

        let Some(job) = jobs
            .iter_mut()
            .filter(|j| j.is_eligible(now))
            .min_by_key(|j| (j.priority, j.created_at))
        else {
            return Ok(None);
        };

        job.status = JobStatus::Processing;
        job.attempts += 1;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn mark_completed(&self, job_id: Uuid) -> Result<(), StoreError> {
        self.transition(job_id, JobStatus::Completed, None)
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<(), StoreError> {
        self.transition(job_id, JobStatus::Failed, Some(error))
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let jobs = self.lock()?;
        Ok(jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn list_by_status(&self, status: JobStatus, limit: i64) -> Result<Vec<Job>, StoreError> {
        let jobs = self.lock()?;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        let mut matching: Vec<Job> = jobs.iter().filter(|j| j.status == status).cloned().collect();
        matching.sort_by_key(|j| (j.priority, j.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        let jobs = self.lock()?;
        let mut stats = QueueStats::default();
        for job in jobs.iter() {
            stats.add(job.status, 1);
        }
        Ok(stats)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_claim_order_priority_then_age() {
        let store = MemoryJobStore::new();
        let a = store.enqueue(NewJob::new("t", json!({})).with_priority(5)).await.unwrap();
        let b = store.enqueue(NewJob::new("t", json!({})).with_priority(1)).await.unwrap();
        let c = store.enqueue(NewJob::new("t", json!({})).with_priority(1)).await.unwrap();

        let order: Vec<Uuid> = [
            store.claim_next().await.unwrap().unwrap().id,
            store.claim_next().await.unwrap().unwrap().id,
            store.claim_next().await.unwrap().unwrap().id,
        ]
        .into();
        assert_eq!(order, vec![b.id, c.id, a.id]);
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_increments_attempts_once() {
        let store = MemoryJobStore::new();
        let job = store.enqueue(NewJob::new("t", json!({}))).await.unwrap();

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.attempts, job.attempts + 1);
        assert_eq!(claimed.status, JobStatus::Processing);

        // Empty claims leave the counter alone.
        assert!(store.claim_next().await.unwrap().is_none());
        assert!(store.claim_next().await.unwrap().is_none());
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_scheduled_job_not_claimable_yet() {
        let store = MemoryJobStore::new();
        store
            .enqueue(NewJob::new("t", json!({})).with_run_after(Utc::now() + chrono::Duration::hours(1)))
            .await
            .unwrap();
        assert!(store.claim_next().await.unwrap().is_none());

        let due = store
            .enqueue(NewJob::new("t", json!({})).with_run_after(Utc::now() - chrono::Duration::seconds(1)))
            .await
            .unwrap();
        assert_eq!(store.claim_next().await.unwrap().unwrap().id, due.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claimers_get_one_job() {
        let store = Arc::new(MemoryJobStore::new());
        let job = store.enqueue(NewJob::new("t", json!({}))).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..32 {
            let store = store.clone();
            tasks.spawn(async move { store.claim_next().await.unwrap() });
        }

        let mut winners = Vec::new();
        while let Some(result) = tasks.join_next().await {
            if let Some(claimed) = result.unwrap() {
                winners.push(claimed.id);
            }
        }
        assert_eq!(winners, vec![job.id]);
    }

    #[tokio::test]
    async fn test_mark_completed_is_idempotent() {
        let store = MemoryJobStore::new();
        let job = store.enqueue(NewJob::new("t", json!({}))).await.unwrap();
        store.claim_next().await.unwrap();

        store.mark_completed(job.id).await.unwrap();
        store.mark_completed(job.id).await.unwrap();

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.processed_at.is_some());
        assert!(stored.last_error.is_none());
    }

    #[tokio::test]
    async fn test_marking_pending_job_rejected() {
        let store = MemoryJobStore::new();
        let job = store.enqueue(NewJob::new("t", json!({}))).await.unwrap();

        let err = store.mark_completed(job.id).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition { from: JobStatus::Pending, to: JobStatus::Completed, .. }
        ));
        let err = store.mark_failed(Uuid::new_v4(), "boom").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_job_keeps_error_and_cannot_complete() {
        let store = MemoryJobStore::new();
        let job = store.enqueue(NewJob::new("t", json!({}))).await.unwrap();
        store.claim_next().await.unwrap();
        store.mark_failed(job.id, "sheet unreachable").await.unwrap();

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("sheet unreachable"));
        assert!(store.mark_completed(job.id).await.is_err());
    }

    #[tokio::test]
    async fn test_fail_and_retry_carries_attempts() {
        let store = MemoryJobStore::new();
        let job = store
            .enqueue(NewJob::new("t", json!({ "k": 1 })).with_priority(7))
            .await
            .unwrap();
        let claimed = store.claim_next().await.unwrap().unwrap();

        let retry = store.fail_and_retry(&claimed, "boom", Utc::now()).await.unwrap();
        assert_eq!(retry.retry_of, Some(job.id));
        assert_eq!(retry.attempts, 1);
        assert_eq!(retry.priority, 7);
        assert_eq!(retry.payload, json!({ "k": 1 }));
        assert_eq!(retry.status, JobStatus::Pending);

        // Original row stays failed.
        let original = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(original.status, JobStatus::Failed);
        assert_eq!(original.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_fail_and_retry_repeated_returns_same_retry() {
        let store = MemoryJobStore::new();
        store.enqueue(NewJob::new("t", json!({}))).await.unwrap();
        let claimed = store.claim_next().await.unwrap().unwrap();

        let first = store.fail_and_retry(&claimed, "boom", Utc::now()).await.unwrap();
        let second = store.fail_and_retry(&claimed, "boom", Utc::now()).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_fail_and_retry_rejects_pending_job() {
        let store = MemoryJobStore::new();
        let job = store.enqueue(NewJob::new("t", json!({}))).await.unwrap();

        let err = store.fail_and_retry(&job, "boom", Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let store = MemoryJobStore::new();
        store.close().await;
        assert!(store.is_closed());
        assert!(matches!(store.claim_next().await, Err(StoreError::Closed)));
    }
}
