//! Polling worker loop.
//!
//! Each worker claims one job at a time from the [`JobStore`], dispatches it
//! through the [`HandlerRegistry`] and records the outcome. Several worker
//! processes can share one store; exclusivity comes from the store's atomic
//! claim, not from any coordination between workers.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Deserialize;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::sleep;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus};
use crate::services::handler::{HandlerRegistry, JobHandler};
use crate::services::queue::{JobStore, StoreError};

pub const DEFAULT_EMPTY_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_FAULT_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(30);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);
/// Tries per outcome write before the iteration counts as a fault.
const OUTCOME_WRITE_ATTEMPTS: u32 = 3;
const OUTCOME_WRITE_BACKOFF: Duration = Duration::from_millis(250);

/// What happens to a job after its handler fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// The job stays failed; `max_attempts` is informational only.
    Advisory,
    /// While attempts remain, a new pending copy of the job is enqueued with
    /// an exponential delay. The failed row itself is left untouched.
    Requeue { base_delay: Duration },
}

impl RetryPolicy {
    /// Delay before the retry of a job that has been claimed `attempts` times.
    pub fn retry_delay(&self, attempts: i32) -> Option<Duration> {
        match self {
            RetryPolicy::Advisory => None,
            RetryPolicy::Requeue { base_delay } => {
                let exponent = attempts.saturating_sub(1).clamp(0, 20) as u32;
                let delay = base_delay.saturating_mul(2u32.saturating_pow(exponent));
                Some(delay.min(MAX_RETRY_DELAY))
            }
        }
    }
}

/// Retry policy name as it appears in configuration.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RetryMode {
    #[default]
    Advisory,
    Requeue,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pause after a claim that found nothing.
    pub empty_backoff: Duration,
    /// Pause after a storage fault.
    pub fault_backoff: Duration,
    pub retry_policy: RetryPolicy,
    /// Deadline for a single handler run. `None` lets handlers run forever.
    pub job_timeout: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            empty_backoff: DEFAULT_EMPTY_BACKOFF,
            fault_backoff: DEFAULT_FAULT_BACKOFF,
            retry_policy: RetryPolicy::Advisory,
            job_timeout: None,
        }
    }
}

impl WorkerConfig {
    pub fn with_empty_backoff(mut self, backoff: Duration) -> Self {
        self.empty_backoff = backoff;
        self
    }

    pub fn with_fault_backoff(mut self, backoff: Duration) -> Self {
        self.fault_backoff = backoff;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }
}

/// Result of one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    Completed(Uuid),
    Failed { job_id: Uuid, retry: Option<Uuid> },
    /// Nothing was eligible.
    Empty,
    /// The store failed during claim or while recording an outcome.
    Fault,
}

/// Counters accumulated over a worker's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub empty_polls: u64,
    pub faults: u64,
}

impl WorkerSummary {
    fn record(&mut self, tick: &Tick) {
        match tick {
            Tick::Completed(_) => self.completed += 1,
            Tick::Failed { retry, .. } => {
                self.failed += 1;
                if retry.is_some() {
                    self.retried += 1;
                }
            }
            Tick::Empty => self.empty_polls += 1,
            Tick::Fault => self.faults += 1,
        }
    }
}

/// Cooperative shutdown flag shared between signal handling and workers.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Resolve on SIGINT or SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

pub struct Worker {
    store: Arc<dyn JobStore>,
    handlers: HandlerRegistry,
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        handlers: HandlerRegistry,
        config: WorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            handlers,
            config,
            shutdown,
        }
    }

    /// Drain the queue until shutdown is requested, then close the store.
    ///
    /// The shutdown flag is checked between iterations, so a job that is
    /// already running always gets its outcome recorded.
    pub async fn run(mut self) -> WorkerSummary {
        if self.handlers.is_empty() {
            tracing::warn!("Worker has no registered handlers; every claimed job will fail");
        }
        tracing::info!(
            handler_count = self.handlers.len(),
            job_types = ?self.handlers.job_types(),
            empty_backoff_ms = self.config.empty_backoff.as_millis() as u64,
            fault_backoff_ms = self.config.fault_backoff.as_millis() as u64,
            retry_policy = ?self.config.retry_policy,
            "Worker started"
        );

        let mut summary = WorkerSummary::default();

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let tick = self.run_once().await;
            summary.record(&tick);

            let delay = match tick {
                Tick::Empty => self.config.empty_backoff,
                Tick::Fault => self.config.fault_backoff,
                Tick::Completed(_) | Tick::Failed { .. } => continue,
            };

            if self.pause(delay).await {
                break;
            }
        }

        tracing::info!(?summary, "Worker stopping, releasing store connections");
        self.store.close().await;
        tracing::info!("Worker stopped");
        summary
    }

    /// Sleep for `delay`, waking early on shutdown. Returns true when the
    /// worker should stop.
    async fn pause(&mut self, delay: Duration) -> bool {
        let sender_gone = tokio::select! {
            changed = self.shutdown.changed() => changed.is_err(),
            () = sleep(delay) => false,
        };
        sender_gone || *self.shutdown.borrow()
    }

    /// Claim and process at most one job.
    pub async fn run_once(&self) -> Tick {
        let job = match self.store.claim_next().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::trace!("No jobs available");
                return Tick::Empty;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim job, backing off");
                metrics::counter!("queue_claim_errors_total").increment(1);
                return Tick::Fault;
            }
        };

        let job_id = job.id;
        match self.execute(job).await {
            Ok(tick) => tick,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to record job outcome");
                Tick::Fault
            }
        }
    }

    #[tracing::instrument(skip_all, fields(job_id = %job.id, job_type = %job.job_type, attempt = job.attempts))]
    async fn execute(&self, job: Job) -> Result<Tick, StoreError> {
        let Some(handler) = self.handlers.get(&job.job_type) else {
            let message = format!("no handler registered for job type '{}'", job.job_type);
            tracing::warn!("{message}");
            return self.record_failure(&job, &message, false).await;
        };

        tracing::info!("Processing job");
        let start = Instant::now();
        let outcome = self.invoke(handler.as_ref(), &job).await;
        let elapsed = start.elapsed();
        metrics::histogram!("queue_job_duration_seconds", "job_type" => job.job_type.clone())
            .record(elapsed.as_secs_f64());

        match outcome {
            Ok(()) => self.record_completion(&job, elapsed).await,
            Err(message) => {
                tracing::error!(error = %message, "Job failed");
                self.record_failure(&job, &message, true).await
            }
        }
    }

    async fn record_completion(&self, job: &Job, elapsed: Duration) -> Result<Tick, StoreError> {
        let store = &self.store;
        let job_id = job.id;

        let error = match persist("completion", move || store.mark_completed(job_id)).await {
            Ok(()) => {
                metrics::counter!("queue_jobs_completed_total", "job_type" => job.job_type.clone())
                    .increment(1);
                tracing::info!(duration_ms = elapsed.as_millis() as u64, "Job completed");
                return Ok(Tick::Completed(job_id));
            }
            Err(e) => e,
        };

        // A handled job must not stay in processing.
        tracing::error!(error = %error, "Could not record completion, marking job failed");
        let reason = format!("failed to record completion: {error}");
        let reason = reason.as_str();
        match persist("failure", move || store.mark_failed(job_id, reason)).await {
            Ok(()) => {
                metrics::counter!("queue_jobs_failed_total", "job_type" => job.job_type.clone())
                    .increment(1);
                Ok(Tick::Failed {
                    job_id,
                    retry: None,
                })
            }
            // The completion write landed although it reported an error.
            Err(StoreError::InvalidTransition {
                from: JobStatus::Completed,
                ..
            }) => {
                metrics::counter!("queue_jobs_completed_total", "job_type" => job.job_type.clone())
                    .increment(1);
                Ok(Tick::Completed(job_id))
            }
            Err(e) => Err(e),
        }
    }

    /// Record a failed run. When `retryable` and the policy allows it, the
    /// failure and the retry row are written together.
    async fn record_failure(
        &self,
        job: &Job,
        message: &str,
        retryable: bool,
    ) -> Result<Tick, StoreError> {
        let store = &self.store;
        let job_id = job.id;

        let plan = if retryable { self.retry_plan(job) } else { None };
        if let Some((run_after, delay)) = plan {
            match persist("failure", move || store.fail_and_retry(job, message, run_after)).await {
                Ok(retry) => {
                    metrics::counter!("queue_jobs_failed_total", "job_type" => job.job_type.clone())
                        .increment(1);
                    metrics::counter!("queue_jobs_retried_total", "job_type" => job.job_type.clone())
                        .increment(1);
                    tracing::info!(
                        retry_id = %retry.id,
                        delay_ms = delay.as_millis() as u64,
                        "Job re-queued for retry"
                    );
                    return Ok(Tick::Failed {
                        job_id,
                        retry: Some(retry.id),
                    });
                }
                Err(e) if e.is_transient() => {
                    tracing::error!(error = %e, "Could not schedule retry, recording failure only");
                }
                Err(e) => return Err(e),
            }
        }

        persist("failure", move || store.mark_failed(job_id, message)).await?;
        metrics::counter!("queue_jobs_failed_total", "job_type" => job.job_type.clone())
            .increment(1);
        Ok(Tick::Failed {
            job_id,
            retry: None,
        })
    }

    /// Run the handler, turning errors, panics and timeouts into the text
    /// stored as `last_error`.
    async fn invoke(&self, handler: &dyn JobHandler, job: &Job) -> Result<(), String> {
        let run = AssertUnwindSafe(handler.handle(job)).catch_unwind();

        let result = match self.config.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => return Err(format!("handler timed out after {limit:?}")),
            },
            None => run.await,
        };

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(format!("handler panicked: {}", panic_message(panic.as_ref()))),
        }
    }

    /// Eligibility time and delay for the next run of `job`, if the retry
    /// policy wants one.
    fn retry_plan(&self, job: &Job) -> Option<(DateTime<Utc>, Duration)> {
        let delay = self.config.retry_policy.retry_delay(job.attempts)?;

        if !job.has_attempts_left() {
            tracing::warn!(
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                "Job exhausted its attempts"
            );
            return None;
        }

        let run_after = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::hours(1));
        Some((run_after, delay))
    }
}

/// Run an outcome write, repeating it while the store reports transient
/// errors, at most `OUTCOME_WRITE_ATTEMPTS` times.
async fn persist<T, F, Fut>(what: &'static str, mut write: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt: u32 = 1;
    loop {
        match write().await {
            Err(e) if e.is_transient() && attempt < OUTCOME_WRITE_ATTEMPTS => {
                tracing::warn!(error = %e, attempt, "Failed to record job {what}, retrying");
                sleep(OUTCOME_WRITE_BACKOFF * attempt).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
