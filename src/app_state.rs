use sqlx::PgPool;
use std::sync::Arc;

use crate::services::jobs::JobService;
use crate::services::queue::TaskQueue;
use crate::services::storage::ObjectStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<TaskQueue>,
    pub jobs: Arc<JobService>,
}

impl AppState {
    pub fn new(db: PgPool, storage: Option<ObjectStore>, queue: TaskQueue) -> Self {
        let queue = Arc::new(queue);
        let storage = storage.map(Arc::new);
        let jobs = Arc::new(JobService::new(db.clone(), storage, queue.clone()));
        Self { db, queue, jobs }
    }
}
