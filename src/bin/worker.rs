use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use report_ingest::config::AppConfig;
use report_ingest::db;
use report_ingest::services::queue::TaskQueue;
use report_ingest::services::storage::ObjectStore;
use report_ingest::tasks::{self, TaskContext, TaskRegistry};

const MAX_RETRIES: u32 = 3;
const POLL_INTERVAL_MS: u64 = 1000; // 1 second
const RETRY_BASE_DELAY_MS: u64 = 2000;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting ingestion worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // The worker cannot process anything without object storage; unlike the
    // API tier this is a startup requirement.
    let storage_cfg = config
        .storage()
        .expect("Worker requires complete S3 configuration");
    let storage =
        ObjectStore::new(&storage_cfg).expect("Failed to initialize object storage client");

    let queue = TaskQueue::new(&config.redis_url).expect("Failed to initialize task queue");
    let queue = Arc::new(queue);

    let registry = TaskRegistry::new(TaskContext {
        db: db_pool,
        storage: Arc::new(storage),
        queue: queue.clone(),
        chunk_lines: config.chunk_lines,
    });

    tracing::info!("Worker ready, starting task processing loop");

    // Main processing loop
    loop {
        match process_next_task(&registry, &queue).await {
            Ok(true) => {
                // Task processed, check for the next one immediately
                tracing::debug!("Task processed, checking for next task");
            }
            Ok(false) => {
                // No task available, sleep before next poll
                tracing::trace!("No tasks available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error in task loop, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Process the next task from the queue.
/// Returns Ok(true) if a task was processed, Ok(false) if no task available.
async fn process_next_task(
    registry: &TaskRegistry,
    queue: &Arc<TaskQueue>,
) -> Result<bool, Box<dyn std::error::Error>> {
    let task = match queue.dequeue().await? {
        Some(t) => t,
        None => return Ok(false), // No task available
    };

    tracing::info!(job_id = %task.job_id(), attempt = task.attempt(), "Processing task");

    match registry.dispatch(&task).await {
        Ok(()) => {
            queue.complete(&task).await?;
            Ok(true)
        }
        Err(e) => {
            let attempt = task.attempt();

            if e.is_permanent() || attempt + 1 >= MAX_RETRIES {
                tracing::error!(
                    job_id = %task.job_id(),
                    attempt,
                    error = %e,
                    "Task failed permanently"
                );
                tasks::record_failure(registry.context(), &task, &e.to_string()).await?;
                queue.complete(&task).await?;
            } else {
                // Re-enqueue after an exponential backoff, off the poll loop
                // so one failing task never stalls the worker.
                let delay = Duration::from_millis(RETRY_BASE_DELAY_MS << attempt);
                tracing::warn!(
                    job_id = %task.job_id(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Task failed, re-queued for retry"
                );

                let retry = task.next_attempt();
                let retry_queue = queue.clone();
                tokio::spawn(async move {
                    sleep(delay).await;
                    if let Err(e) = retry_queue.enqueue(&retry).await {
                        tracing::error!(
                            job_id = %retry.job_id(),
                            error = %e,
                            "Failed to re-enqueue task"
                        );
                    }
                });

                queue.complete(&task).await?;
            }

            Ok(true)
        }
    }
}
