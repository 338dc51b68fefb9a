use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

use crate::services::worker::{RetryMode, RetryPolicy, WorkerConfig};

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Pool size for the API server
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Pool size for a worker process
    #[serde(default = "default_worker_db_max_connections")]
    pub worker_db_max_connections: u32,

    /// Sleep after a poll that found no eligible job
    #[serde(default = "default_empty_backoff_ms")]
    pub worker_empty_backoff_ms: u64,

    /// Sleep after a storage fault
    #[serde(default = "default_fault_backoff_ms")]
    pub worker_fault_backoff_ms: u64,

    /// `advisory` keeps failed jobs failed, `requeue` retries while attempts remain
    #[serde(default)]
    pub worker_retry_policy: RetryMode,

    /// First retry delay under the `requeue` policy; doubles per attempt
    #[serde(default = "default_retry_base_delay_ms")]
    pub worker_retry_base_delay_ms: u64,

    /// Per-job deadline in seconds; unset means no deadline
    #[serde(default)]
    pub worker_job_timeout_secs: Option<u64>,

    /// Where a worker process serves its Prometheus scrape endpoint
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: SocketAddr,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_db_max_connections() -> u32 {
    20
}

fn default_worker_db_max_connections() -> u32 {
    5
}

fn default_empty_backoff_ms() -> u64 {
    2_000
}

fn default_fault_backoff_ms() -> u64 {
    5_000
}

fn default_retry_base_delay_ms() -> u64 {
    30_000
}

fn default_worker_metrics_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9100))
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Worker loop settings derived from the environment.
    pub fn worker_config(&self) -> WorkerConfig {
        let retry_policy = match self.worker_retry_policy {
            RetryMode::Advisory => RetryPolicy::Advisory,
            RetryMode::Requeue => RetryPolicy::Requeue {
                base_delay: Duration::from_millis(self.worker_retry_base_delay_ms),
            },
        };

        WorkerConfig {
            empty_backoff: Duration::from_millis(self.worker_empty_backoff_ms),
            fault_backoff: Duration::from_millis(self.worker_fault_backoff_ms),
            retry_policy,
            job_timeout: self
                .worker_job_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }
}
