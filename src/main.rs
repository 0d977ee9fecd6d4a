use image_recognition_worker::{
    app_state::AppState,
    config::AppConfig,
    db::{self, store::PgJobStore},
    routes,
    services::{
        host::CommandHostController, queue::RedisQueue, recognizer::CommandRecognizer,
        storage::S3ResultSink,
    },
    worker::Worker,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    let settings = config
        .worker_settings()
        .expect("Invalid worker configuration");
    let recognition_timeout = config
        .recognition_timeout()
        .expect("Invalid recognition timeout");
    let visibility_timeout = config
        .visibility_timeout()
        .expect("Invalid visibility timeout");

    tracing::info!(instance_id = %settings.instance_id, "Initializing image recognition worker");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    tracing::info!("Connecting to PostgreSQL job store");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Initializing result bucket client");
    let results = S3ResultSink::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize result bucket client");

    tracing::info!("Connecting to Redis queues");
    let queue = RedisQueue::new(&config.redis_url, visibility_timeout)
        .expect("Failed to initialize queue client");

    let recognizer = CommandRecognizer::new(
        config.recognizer_program.clone(),
        config.recognizer_args.clone(),
        recognition_timeout,
    );
    let host = CommandHostController::new(
        config.shutdown_program.clone(),
        config.shutdown_args.clone(),
    );

    let state = AppState::new(queue, PgJobStore::new(db_pool), results, recognizer, host);

    // The loop is never joined; process exit is its only stop signal.
    let worker = Worker::new(&state, settings);
    tokio::spawn(worker.run());

    let app = routes::router(state, prometheus_handle);

    tracing::info!("Starting status endpoint on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
