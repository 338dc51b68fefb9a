use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobStatus;

/// Response after submitting a job.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Query string for `GET /api/v1/jobs`.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: JobStatus,
    #[serde(default = "default_list_limit")]
    pub limit: i64,
}

pub const MAX_LIST_LIMIT: i64 = 500;

fn default_list_limit() -> i64 {
    50
}

impl ListJobsQuery {
    pub fn clamped_limit(&self) -> i64 {
        self.limit.clamp(1, MAX_LIST_LIMIT)
    }
}
