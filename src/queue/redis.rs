//! Redis-backed queue: one list key, RPUSH tail / LPOP head.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::QueueError;
use crate::job::QueuedJob;

use super::QueueStore;

#[derive(Clone)]
pub struct RedisQueue {
    manager: ConnectionManager,
    key: String,
}

impl RedisQueue {
    pub fn new(manager: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            manager,
            key: key.into(),
        }
    }

    /// Connect and build the queue over the given list key.
    pub async fn connect(url: &str, key: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(url).map_err(QueueError::from)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(QueueError::from)?;
        Ok(Self::new(manager, key))
    }

    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl QueueStore for RedisQueue {
    async fn enqueue(&self, job: &QueuedJob) -> Result<usize, QueueError> {
        let payload =
            serde_json::to_string(job).map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let mut con = self.manager.clone();
        let len: i64 = con.rpush(&self.key, payload).await?;
        Ok(len.max(0) as usize)
    }

    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError> {
        let mut con = self.manager.clone();
        let raw: Option<String> = con.lpop(&self.key, None).await?;
        match raw {
            None => Ok(None),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(job) => Ok(Some(job)),
                Err(e) => {
                    // The entry is already popped; dropping it is the same
                    // at-most-once contract a consumer crash would give.
                    tracing::warn!(error = %e, "dropping malformed queue entry");
                    Ok(None)
                }
            },
        }
    }

    async fn peek(&self, limit: usize) -> Result<Vec<QueuedJob>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut con = self.manager.clone();
        let raw: Vec<String> = con.lrange(&self.key, 0, limit as isize - 1).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }

    async fn clear(&self) -> Result<(), QueueError> {
        let mut con = self.manager.clone();
        let _: i64 = con.del(&self.key).await?;
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut con = self.manager.clone();
        let len: i64 = con.llen(&self.key).await?;
        Ok(len.max(0) as usize)
    }

    fn durable(&self) -> bool {
        true
    }
}
