//! Queue worker: a recurring, non-overlapping drain of the job queue.
//!
//! Each tick moves at most one job from the queue through the orchestrator.
//! The in-flight flag is the single shared mutable resource: acquired by
//! compare-exchange before dequeue, released by an RAII guard on every
//! outcome, so a second tick can never start a second job.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::admission::AdmissionGate;
use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::queue::QueueStore;

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct QueueWorker {
    config: Arc<Config>,
    gate: Arc<AdmissionGate>,
    queue: Arc<dyn QueueStore>,
    orchestrator: Arc<Orchestrator>,
    in_flight: AtomicBool,
}

impl QueueWorker {
    pub fn new(
        config: Arc<Config>,
        gate: Arc<AdmissionGate>,
        queue: Arc<dyn QueueStore>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            config,
            gate,
            queue,
            orchestrator,
            in_flight: AtomicBool::new(false),
        }
    }

    /// One tick: dequeue and run at most one job, or do nothing.
    pub async fn tick(&self) {
        if !self.config.queue.enabled {
            return;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("job already in flight; skipping tick");
            return;
        }
        let _guard = InFlightGuard(&self.in_flight);

        if !self.gate.is_available().await {
            tracing::debug!("gate unavailable; leaving queue untouched");
            return;
        }

        let job = match self.queue.dequeue().await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "failed to dequeue");
                return;
            }
        };

        tracing::info!(
            job_id = %job.id,
            product = %job.request.product,
            enqueued_at = %job.enqueued_at,
            "processing queued job"
        );
        match self.orchestrator.run(&job.request).await {
            Ok(outcome) => {
                tracing::info!(uri = ?outcome.uri, dseq = ?outcome.dseq, "queued job completed")
            }
            // The original caller got a "queued" response long ago; failure
            // here can only be logged.
            Err(e) => tracing::warn!(error = %e, "queued job failed"),
        }
    }

    /// Run the tick loop forever at the configured interval.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = Duration::from_secs(self.config.orchestrator.worker_tick_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }
}
