use sqlx::PgPool;
use std::sync::Arc;

use crate::db::job_store::PgJobStore;
use crate::services::queue::JobQueue;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: JobQueue,
}

impl AppState {
    pub fn new(db: PgPool) -> Self {
        let store = Arc::new(PgJobStore::new(db.clone()));
        Self {
            db,
            queue: JobQueue::new(store),
        }
    }
}
