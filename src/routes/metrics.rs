use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::services::queue::JobQueue;

/// State for the scrape endpoint.
#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub queue: JobQueue,
}

/// Prometheus scrape endpoint. Refreshes the queue depth gauge first so the
/// exposition reflects the table at scrape time.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    if let Err(e) = state.queue.stats().await {
        tracing::warn!(error = %e, "Could not refresh queue depth for scrape");
    }
    state.handle.render()
}
