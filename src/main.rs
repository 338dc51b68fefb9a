use guild_jobs::{
    app_state::AppState, config::AppConfig, db, routes, services::worker::wait_for_signal,
    telemetry,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

fn install_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    telemetry::describe_metrics();
    handle
}

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    let config = AppConfig::from_env().expect("Failed to load configuration");
    tracing::info!(bind_addr = %config.bind_addr, "Starting guild-jobs API");

    let prometheus = Arc::new(install_metrics());

    let db_pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to apply queue migrations");

    let app = routes::router(AppState::new(db_pool), prometheus);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind listener");
    tracing::info!("API listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_signal())
        .await
        .expect("Server error");

    tracing::info!("API stopped");
}
