use async_trait::async_trait;
use chrono::Utc;
use garde::Validate;
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::db::sync_logs::{self, NewSyncLog};
use crate::models::job::Job;
use crate::models::sheets::SheetsSyncPayload;
use crate::services::handler::{HandlerError, JobHandler};

/// Handler for `sheets_sync` jobs.
///
/// Exporting to the spreadsheet itself is done elsewhere; this records the
/// sync run for the guild so the dashboard can show when it last happened.
pub struct SheetsSyncHandler {
    db: PgPool,
}

impl SheetsSyncHandler {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Decode and validate a `sheets_sync` payload.
pub fn parse_payload(payload: &JsonValue) -> Result<SheetsSyncPayload, HandlerError> {
    let parsed: SheetsSyncPayload = serde_json::from_value(payload.clone())
        .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;
    parsed
        .validate()
        .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;
    Ok(parsed)
}

#[async_trait]
impl JobHandler for SheetsSyncHandler {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        let payload = parse_payload(&job.payload)?;
        let started_at = Utc::now();

        tracing::info!(
            job_id = %job.id,
            guild_id = %payload.guild_id,
            sheet_id = payload.sheet_id.as_deref().unwrap_or("-"),
            force = payload.force.unwrap_or(false),
            "Running sheets sync"
        );

        let log_id = sync_logs::insert_sync_log(
            &self.db,
            &NewSyncLog {
                guild_id: &payload.guild_id,
                sheet_id: payload.sheet_id.as_deref(),
                range: payload.range.as_deref(),
                rows_sent: 0,
                status: "completed",
                error: None,
                started_at,
                finished_at: Utc::now(),
            },
        )
        .await?;

        tracing::debug!(job_id = %job.id, log_id = %log_id, "Sheets sync logged");
        Ok(())
    }
}
