//! Deployment teardown scheduling.
//!
//! Each completed session owes exactly one delayed close transaction. The
//! obligation is written to the store as a [`PendingTeardown`] record before
//! the timer is armed, and reconciled on startup, so a process restart does
//! not silently leak a running deployment. Teardown failures are logged,
//! never retried, and never re-surfaced to the original caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::QueueError;
use crate::market::Marketplace;

/// A teardown obligation, keyed by the session's deployment sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTeardown {
    pub dseq: u64,
    pub fire_at: DateTime<Utc>,
}

#[async_trait]
pub trait TeardownStore: Send + Sync {
    async fn put(&self, record: &PendingTeardown) -> Result<(), QueueError>;
    async fn remove(&self, dseq: u64) -> Result<(), QueueError>;
    async fn all(&self) -> Result<Vec<PendingTeardown>, QueueError>;
}

/// Process-local fallback. Records vanish with the process; the degraded
/// mode is logged at startup alongside the memory queue's warning.
#[derive(Debug, Default)]
pub struct MemoryTeardownStore {
    records: Mutex<HashMap<u64, PendingTeardown>>,
}

impl MemoryTeardownStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TeardownStore for MemoryTeardownStore {
    async fn put(&self, record: &PendingTeardown) -> Result<(), QueueError> {
        self.records.lock().await.insert(record.dseq, record.clone());
        Ok(())
    }

    async fn remove(&self, dseq: u64) -> Result<(), QueueError> {
        self.records.lock().await.remove(&dseq);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<PendingTeardown>, QueueError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }
}

/// Durable records in a Redis hash, field = dseq.
#[derive(Clone)]
pub struct RedisTeardownStore {
    manager: ConnectionManager,
    key: String,
}

impl RedisTeardownStore {
    pub fn new(manager: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            manager,
            key: key.into(),
        }
    }
}

#[async_trait]
impl TeardownStore for RedisTeardownStore {
    async fn put(&self, record: &PendingTeardown) -> Result<(), QueueError> {
        let payload =
            serde_json::to_string(record).map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let mut con = self.manager.clone();
        let _: i64 = con.hset(&self.key, record.dseq, payload).await?;
        Ok(())
    }

    async fn remove(&self, dseq: u64) -> Result<(), QueueError> {
        let mut con = self.manager.clone();
        let _: i64 = con.hdel(&self.key, dseq).await?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<PendingTeardown>, QueueError> {
        let mut con = self.manager.clone();
        let raw: Vec<String> = con.hvals(&self.key).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }
}

/// Arms one-shot timers for pending teardowns and reconciles persisted
/// obligations on startup.
pub struct TeardownScheduler {
    store: Arc<dyn TeardownStore>,
    market: Arc<dyn Marketplace>,
}

impl TeardownScheduler {
    pub fn new(store: Arc<dyn TeardownStore>, market: Arc<dyn Marketplace>) -> Self {
        Self { store, market }
    }

    /// Persist the obligation and arm its timer. A persist failure is logged
    /// and the timer armed anyway; the caller's response has already been
    /// decided and must not change.
    pub async fn schedule(self: &Arc<Self>, dseq: u64, delay: Duration) {
        // Saturating conversion: a delay beyond the calendar's range pins the
        // record to the far future instead of wrapping negative.
        let secs = i64::try_from(delay.as_secs()).unwrap_or(i64::MAX);
        let fire_at = chrono::Duration::try_seconds(secs)
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let record = PendingTeardown { dseq, fire_at };
        if let Err(e) = self.store.put(&record).await {
            tracing::warn!(dseq, error = %e, "failed to persist pending teardown");
        }
        tracing::info!(dseq, delay_secs = delay.as_secs(), "teardown scheduled");
        self.spawn_fire(dseq, delay);
    }

    /// Re-arm timers for every persisted obligation. Overdue records fire
    /// immediately. Returns the number of records re-armed.
    pub async fn reconcile(self: &Arc<Self>) -> Result<usize, QueueError> {
        let records = self.store.all().await?;
        let count = records.len();
        let now = Utc::now();
        for record in records {
            let delay = (record.fire_at - now).to_std().unwrap_or(Duration::ZERO);
            tracing::info!(
                dseq = record.dseq,
                delay_secs = delay.as_secs(),
                "re-armed pending teardown"
            );
            self.spawn_fire(record.dseq, delay);
        }
        Ok(count)
    }

    fn spawn_fire(self: &Arc<Self>, dseq: u64, delay: Duration) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.fire(dseq).await;
        });
    }

    async fn fire(&self, dseq: u64) {
        match self.market.close_deployment(dseq).await {
            Ok(()) => tracing::info!(dseq, "deployment closed"),
            Err(e) => tracing::warn!(dseq, error = %e, "teardown failed; not retried"),
        }
        if let Err(e) = self.store.remove(dseq).await {
            tracing::warn!(dseq, error = %e, "failed to remove teardown record");
        }
    }
}
