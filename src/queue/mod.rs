//! Durable FIFO queue of pending jobs.
//!
//! Two backends behind one trait, selected once at startup: a Redis list
//! (durable) and an in-memory fallback (explicitly non-durable). Dequeue is
//! destructive: at-most-once delivery, no redelivery on consumer crash.

mod memory;
mod redis;

pub use memory::MemoryQueue;
pub use redis::RedisQueue;

use async_trait::async_trait;

use crate::error::QueueError;
use crate::job::QueuedJob;

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append to the tail. Returns the new queue length.
    async fn enqueue(&self, job: &QueuedJob) -> Result<usize, QueueError>;

    /// Pop from the head. The job is removed before processing begins; a
    /// crash mid-processing loses it rather than duplicating it.
    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError>;

    /// Non-destructive inspection of up to `limit` entries in FIFO order.
    /// Malformed stored entries are dropped from the result, not surfaced.
    async fn peek(&self, limit: usize) -> Result<Vec<QueuedJob>, QueueError>;

    /// Empty the queue unconditionally.
    async fn clear(&self) -> Result<(), QueueError>;

    async fn len(&self) -> Result<usize, QueueError>;

    /// Whether entries survive a process restart.
    fn durable(&self) -> bool;
}

/// Enqueue with idempotency-key dedup: if a pending entry already carries the
/// same key, report its position instead of inserting a duplicate.
pub async fn enqueue_deduped(
    store: &dyn QueueStore,
    job: QueuedJob,
) -> Result<usize, QueueError> {
    if let Some(key) = job.idempotency_key.as_deref() {
        let pending = store.peek(store.len().await?).await?;
        if let Some(pos) = pending
            .iter()
            .position(|p| p.idempotency_key.as_deref() == Some(key))
        {
            tracing::debug!(idempotency_key = key, position = pos + 1, "duplicate enqueue");
            return Ok(pos + 1);
        }
    }
    store.enqueue(&job).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobRequest;

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let q = MemoryQueue::new();
        for product in ["whisper", "sd", "llama"] {
            q.enqueue(&QueuedJob::new(JobRequest::new(product), None))
                .await
                .unwrap();
        }
        for expected in ["whisper", "sd", "llama"] {
            let job = q.dequeue().await.unwrap().unwrap();
            assert_eq!(job.request.product, expected);
        }
        assert!(q.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn enqueue_reports_new_length() {
        let q = MemoryQueue::new();
        assert_eq!(q.enqueue(&QueuedJob::new(JobRequest::new("sd"), None)).await.unwrap(), 1);
        assert_eq!(q.enqueue(&QueuedJob::new(JobRequest::new("sd"), None)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn peek_is_bounded_and_non_destructive() {
        let q = MemoryQueue::new();
        for product in ["whisper", "sd", "llama"] {
            q.enqueue(&QueuedJob::new(JobRequest::new(product), None))
                .await
                .unwrap();
        }
        let seen = q.peek(2).await.unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].request.product, "whisper");
        assert_eq!(q.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn dedup_returns_existing_position() {
        let q = MemoryQueue::new();
        let first = QueuedJob::new(JobRequest::new("sd"), Some("abc".into()));
        let dup = QueuedJob::new(JobRequest::new("sd"), Some("abc".into()));
        assert_eq!(enqueue_deduped(&q, first).await.unwrap(), 1);
        assert_eq!(enqueue_deduped(&q, dup).await.unwrap(), 1);
        assert_eq!(q.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn clear_empties_everything() {
        let q = MemoryQueue::new();
        q.enqueue(&QueuedJob::new(JobRequest::new("sd"), None))
            .await
            .unwrap();
        q.clear().await.unwrap();
        assert_eq!(q.len().await.unwrap(), 0);
    }
}
