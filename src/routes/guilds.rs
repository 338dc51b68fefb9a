use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::api::EnqueueResponse;
use crate::models::job::{JobStatus, NewJob};
use crate::models::sheets::{RefreshSheetsRequest, SHEETS_SYNC_JOB, SHEETS_SYNC_PRIORITY};
use crate::routes::jobs::queue_error_response;

/// POST /api/v1/guilds/{guild_id}/refresh-sheets: Enqueue a sheet sync for a guild.
pub async fn refresh_sheets(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<EnqueueResponse>), (StatusCode, String)> {
    // The body is optional; an empty request refreshes with defaults.
    let request: RefreshSheetsRequest = if body.is_empty() {
        RefreshSheetsRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    };
    let payload = request.into_payload(guild_id);
    payload
        .validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let payload = serde_json::to_value(&payload)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let handle = state
        .queue
        .enqueue(NewJob::new(SHEETS_SYNC_JOB, payload).with_priority(SHEETS_SYNC_PRIORITY))
        .await
        .map_err(queue_error_response)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: handle.id,
            status: JobStatus::Pending,
        }),
    ))
}
