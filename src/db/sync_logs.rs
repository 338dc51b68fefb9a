use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// One row of the `sheets_sync_logs` table.
#[derive(Debug, Clone)]
pub struct NewSyncLog<'a> {
    pub guild_id: &'a str,
    pub sheet_id: Option<&'a str>,
    pub range: Option<&'a str>,
    pub rows_sent: i32,
    pub status: &'a str,
    pub error: Option<&'a str>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Record the outcome of a sheet sync run.
pub async fn insert_sync_log(pool: &PgPool, log: &NewSyncLog<'_>) -> Result<Uuid, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO sheets_sync_logs
            (guild_id, sheet_id, range, rows_sent, status, error, started_at, finished_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(log.guild_id)
    .bind(log.sheet_id)
    .bind(log.range)
    .bind(log.rows_sent)
    .bind(log.status)
    .bind(log.error)
    .bind(log.started_at)
    .bind(log.finished_at)
    .fetch_one(pool)
    .await?;

    row.try_get("id")
}
