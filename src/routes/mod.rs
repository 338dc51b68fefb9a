pub mod guilds;
pub mod health;
pub mod jobs;
pub mod metrics;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Build the HTTP router.
pub fn router(state: AppState, prometheus: Arc<PrometheusHandle>) -> Router {
    let metrics_state = metrics::MetricsState {
        handle: prometheus,
        queue: state.queue.clone(),
    };

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/jobs", post(jobs::enqueue_job).get(jobs::list_jobs))
        .route("/api/v1/jobs/stats", get(jobs::queue_stats))
        .route("/api/v1/jobs/{job_id}", get(jobs::get_job))
        .route(
            "/api/v1/guilds/{guild_id}/refresh-sheets",
            post(guilds::refresh_sheets),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(metrics_state),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)) // 1 MB limit
}
