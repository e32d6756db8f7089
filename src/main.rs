use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use report_ingest::app_state::AppState;
use report_ingest::config::AppConfig;
use report_ingest::db;
use report_ingest::routes;
use report_ingest::services::{queue::TaskQueue, storage::ObjectStore};

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

    tracing::info!("Initializing report-ingest server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("ingest_jobs_total", "Total ingestion jobs created");
    metrics::describe_counter!("ingest_jobs_completed", "Total ingestion jobs completed");
    metrics::describe_counter!("ingest_jobs_failed", "Total ingestion jobs that failed");
    metrics::describe_counter!("ingest_chunks_total", "Total chunks produced by splitting");
    metrics::describe_counter!("ingest_chunks_processed", "Total chunks processed");
    metrics::describe_counter!("ingest_chunks_failed", "Total chunks that failed terminally");
    metrics::describe_counter!("ingest_rows_upserted", "Total aggregated rows upserted");
    metrics::describe_gauge!("ingest_queue_depth", "Current number of pending tasks");
    metrics::describe_histogram!("chunk_processing_seconds", "Time to process one chunk");

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Object storage is optional at startup; without it, job creation
    // reports a configuration error instead of the server refusing to boot.
    let storage = match config.storage() {
        Some(cfg) => {
            tracing::info!(bucket = %cfg.bucket, "Initializing object storage client");
            Some(ObjectStore::new(&cfg).expect("Failed to initialize object storage client"))
        }
        None => {
            tracing::warn!("Object storage not configured; ingestion endpoints will return 503");
            None
        }
    };

    // Initialize Redis task queue
    tracing::info!("Connecting to Redis task queue");
    let queue = TaskQueue::new(&config.redis_url).expect("Failed to initialize task queue");

    // Create shared application state
    let state = AppState::new(db_pool, storage, queue);

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/api/v1/jobs",
            get(routes::jobs::list_jobs).post(routes::jobs::create_job),
        )
        .route("/api/v1/jobs/multipart", post(routes::jobs::init_multipart))
        .route("/api/v1/jobs/{job_id}", get(routes::jobs::get_job))
        .route("/api/v1/jobs/{job_id}/commit", post(routes::jobs::commit_job))
        .route("/api/v1/jobs/{job_id}/retry", post(routes::jobs::retry_job))
        .route("/api/v1/jobs/{job_id}/cancel", post(routes::jobs::cancel_job))
        .route(
            "/api/v1/jobs/{job_id}/multipart/part-url",
            post(routes::jobs::multipart_part_url),
        )
        .route(
            "/api/v1/jobs/{job_id}/multipart/complete",
            post(routes::jobs::complete_multipart),
        )
        .route(
            "/api/v1/jobs/{job_id}/multipart/abort",
            post(routes::jobs::abort_multipart),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // JSON bodies only; file bytes go to storage

    tracing::info!("Starting report-ingest on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
