//! Job handlers and the registry the worker dispatches through.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::job::Job;

/// Executes the work described by one job type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run the job. The job has already been claimed; its `payload` is
    /// handler-specific.
    async fn handle(&self, job: &Job) -> Result<(), HandlerError>;
}

/// Why a handler gave up on a job. The display text is stored verbatim as
/// the job's `last_error`.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Mapping from job type to handler, built once before the worker starts.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `job_type`, replacing any earlier registration.
    pub fn register<H: JobHandler + 'static>(&mut self, job_type: impl Into<String>, handler: H) {
        let job_type = job_type.into();
        tracing::debug!(job_type = %job_type, "Registered job handler");
        self.handlers.insert(job_type, Arc::new(handler));
    }

    pub fn with_handler<H: JobHandler + 'static>(
        mut self,
        job_type: impl Into<String>,
        handler: H,
    ) -> Self {
        self.register(job_type, handler);
        self
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}
