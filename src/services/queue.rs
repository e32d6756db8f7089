use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const QUEUE_KEY: &str = "report_ingest:tasks";
const PROCESSING_KEY: &str = "report_ingest:processing";

/// Task payload serialized into Redis. `attempt` counts deliveries of this
/// payload; transient failures re-enqueue with `attempt + 1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Split a committed job's source file into chunk objects and enqueue
    /// one `ProcessChunk` per chunk.
    SplitJob { job_id: Uuid, attempt: u32 },

    /// Process one chunk object: parse, aggregate, upsert, update counters.
    ProcessChunk {
        job_id: Uuid,
        chunk_index: i32,
        storage_key: String,
        attempt: u32,
    },
}

impl TaskPayload {
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::SplitJob { job_id, .. } | Self::ProcessChunk { job_id, .. } => *job_id,
        }
    }

    pub fn attempt(&self) -> u32 {
        match self {
            Self::SplitJob { attempt, .. } | Self::ProcessChunk { attempt, .. } => *attempt,
        }
    }

    /// The same task with its delivery counter bumped, for retry enqueue.
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        match &mut next {
            Self::SplitJob { attempt, .. } | Self::ProcessChunk { attempt, .. } => *attempt += 1,
        }
        next
    }
}

/// Redis-backed async task queue with retry support.
pub struct TaskQueue {
    client: redis::Client,
}

impl TaskQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Enqueue a task.
    pub async fn enqueue(&self, task: &TaskPayload) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(task).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Dequeue a task for processing (pop with move to processing list).
    pub async fn dequeue(&self) -> Result<Option<TaskPayload>, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let result: Option<String> = conn
            .rpoplpush(QUEUE_KEY, PROCESSING_KEY)
            .await
            .map_err(QueueError::Redis)?;

        match result {
            Some(payload) => {
                let task: TaskPayload =
                    serde_json::from_str(&payload).map_err(QueueError::Serialize)?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Current queue depth (pending tasks).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let depth: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    /// Mark a task as complete (remove from processing list).
    pub async fn complete(&self, task: &TaskPayload) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(task).map_err(QueueError::Serialize)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
