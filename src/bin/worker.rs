use guild_jobs::{
    config::AppConfig,
    db::{self, job_store::PgJobStore},
    models::sheets::SHEETS_SYNC_JOB,
    services::{
        handler::HandlerRegistry,
        sheets_sync::SheetsSyncHandler,
        worker::{wait_for_signal, Shutdown, Worker},
    },
    telemetry,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    tracing::info!("Starting job worker");

    // Missing configuration or an unreachable store at startup are fatal
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Job outcome metrics live in this process; expose them on their own port
    PrometheusBuilder::new()
        .with_http_listener(config.worker_metrics_addr)
        .install()
        .expect("Failed to start Prometheus exporter");
    telemetry::describe_metrics();
    tracing::info!(addr = %config.worker_metrics_addr, "Worker metrics exporter listening");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url, config.worker_db_max_connections)
        .await
        .expect("Failed to connect to database");

    let handlers = HandlerRegistry::new()
        .with_handler(SHEETS_SYNC_JOB, SheetsSyncHandler::new(db_pool.clone()));

    let store = Arc::new(PgJobStore::new(db_pool));

    let shutdown = Shutdown::new();
    let worker = Worker::new(store, handlers, config.worker_config(), shutdown.subscribe());

    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();
    });

    let summary = worker.run().await;

    tracing::info!(
        completed = summary.completed,
        failed = summary.failed,
        retried = summary.retried,
        faults = summary.faults,
        "Worker exited"
    );
}
