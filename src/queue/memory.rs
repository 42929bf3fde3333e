//! In-memory queue backend.
//!
//! Degraded mode for deployments without a configured list store. Offers
//! zero durability: a restart loses every entry. Startup logs this loudly.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::QueueError;
use crate::job::QueuedJob;

use super::QueueStore;

#[derive(Debug, Default)]
pub struct MemoryQueue {
    items: Mutex<VecDeque<QueuedJob>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueue {
    async fn enqueue(&self, job: &QueuedJob) -> Result<usize, QueueError> {
        let mut items = self.items.lock().await;
        items.push_back(job.clone());
        Ok(items.len())
    }

    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError> {
        Ok(self.items.lock().await.pop_front())
    }

    async fn peek(&self, limit: usize) -> Result<Vec<QueuedJob>, QueueError> {
        Ok(self.items.lock().await.iter().take(limit).cloned().collect())
    }

    async fn clear(&self) -> Result<(), QueueError> {
        self.items.lock().await.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.items.lock().await.len())
    }

    fn durable(&self) -> bool {
        false
    }
}
