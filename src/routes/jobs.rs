use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{EnqueueResponse, ListJobsQuery};
use crate::models::job::{Job, JobStatus, NewJob, QueueStats};
use crate::services::queue::QueueError;

/// Map queue errors to an HTTP status and message.
pub(crate) fn queue_error_response(err: QueueError) -> (StatusCode, String) {
    match err {
        QueueError::Validation(message) => (StatusCode::BAD_REQUEST, message),
        QueueError::Store(e) => {
            tracing::error!(error = %e, "Job store error");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Job store unavailable".to_string(),
            )
        }
    }
}

/// POST /api/v1/jobs: Put a job on the queue.
pub async fn enqueue_job(
    State(state): State<AppState>,
    Json(request): Json<NewJob>,
) -> Result<(StatusCode, Json<EnqueueResponse>), (StatusCode, String)> {
    let handle = state
        .queue
        .enqueue(request)
        .await
        .map_err(queue_error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(EnqueueResponse {
            job_id: handle.id,
            status: JobStatus::Pending,
        }),
    ))
}

/// GET /api/v1/jobs/{job_id}: Inspect one job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, (StatusCode, String)> {
    state
        .queue
        .get(job_id)
        .await
        .map_err(queue_error_response)?
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Job {job_id} not found")))
}

/// GET /api/v1/jobs?status=pending&limit=50: List jobs in one status.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<Job>>, (StatusCode, String)> {
    let jobs = state
        .queue
        .list_by_status(query.status, query.clamped_limit())
        .await
        .map_err(queue_error_response)?;
    Ok(Json(jobs))
}

/// GET /api/v1/jobs/stats: Job counts per status.
pub async fn queue_stats(
    State(state): State<AppState>,
) -> Result<Json<QueueStats>, (StatusCode, String)> {
    let stats = state.queue.stats().await.map_err(queue_error_response)?;
    Ok(Json(stats))
}
