use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable ingestion job transport. The original RQ-over-Redis worker
/// (`original_source/worker/worker.py`) used the `rq` Python package; this
/// is a minimal Redis-list equivalent since there is no Rust `rq` client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum IngestJob {
    Extract { workspace_id: Uuid, document_id: Uuid },
    Index { workspace_id: Uuid, document_id: Uuid },
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: IngestJob) -> anyhow::Result<()>;
    /// Blocks until a job is available or `timeout_seconds` elapses.
    async fn dequeue(&self, timeout_seconds: u64) -> anyhow::Result<Option<IngestJob>>;
}

pub struct RedisJobQueue {
    pool: Pool,
    queue_name: String,
}

impl RedisJobQueue {
    pub fn new(redis_url: &str, queue_name: impl Into<String>) -> anyhow::Result<Self> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self {
            pool,
            queue_name: queue_name.into(),
        })
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: IngestJob) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        let payload = serde_json::to_string(&job)?;
        let _: () = conn.lpush(&self.queue_name, payload).await?;
        Ok(())
    }

    async fn dequeue(&self, timeout_seconds: u64) -> anyhow::Result<Option<IngestJob>> {
        let mut conn = self.pool.get().await?;
        let popped: Option<(String, String)> = conn.brpop(&self.queue_name, timeout_seconds as f64).await?;
        match popped {
            Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}
