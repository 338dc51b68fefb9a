//! Logging and metric registration shared by the API and worker binaries.

use tracing_subscriber::EnvFilter;

/// JSON logs filtered by `RUST_LOG`, `info` when unset.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
}

/// Register help text for every queue metric with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "queue_jobs_enqueued_total",
        "Jobs accepted onto the queue"
    );
    metrics::describe_counter!(
        "queue_jobs_completed_total",
        "Jobs whose handler succeeded"
    );
    metrics::describe_counter!(
        "queue_jobs_failed_total",
        "Jobs recorded as failed"
    );
    metrics::describe_counter!(
        "queue_jobs_retried_total",
        "Retry rows inserted for failed jobs"
    );
    metrics::describe_counter!(
        "queue_claim_errors_total",
        "Claim attempts that failed in the store"
    );
    metrics::describe_histogram!(
        "queue_job_duration_seconds",
        metrics::Unit::Seconds,
        "Handler run time per job"
    );
    metrics::describe_gauge!("queue_depth", "Jobs waiting in pending status");
}
