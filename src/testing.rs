//! Stub implementations of the external seams, shared by unit tests and the
//! integration scenarios in `tests/`.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{MarketError, QueueError};
use crate::job::QueuedJob;
use crate::market::{Lease, Marketplace};
use crate::queue::QueueStore;

/// Provider address the stub hands out leases for.
pub const PROVIDER: &str = "akash1testprovider0000000000000000000000000";

/// A scripted marketplace that records every invocation.
pub struct StubMarket {
    pub address: Option<String>,
    pub leases: Vec<Lease>,
    pub uri: Option<String>,
    pub fail_manifest: bool,
    pub fail_close: bool,
    /// Artificial latency inside `create_deployment`, for concurrency tests.
    pub step_delay: Duration,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Default for StubMarket {
    fn default() -> Self {
        Self {
            address: Some("akash1brokerowner00000000000000000000000000".to_string()),
            leases: vec![Lease {
                gseq: 1,
                oseq: 1,
                provider: PROVIDER.to_string(),
            }],
            uri: Some("sd.test-provider.example.com".to_string()),
            fail_manifest: false,
            fail_close: false,
            step_delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }
}

impl StubMarket {
    pub fn no_leases() -> Self {
        Self {
            leases: Vec::new(),
            ..Self::default()
        }
    }

    pub fn no_key() -> Self {
        Self {
            address: None,
            ..Self::default()
        }
    }

    pub fn without_uri() -> Self {
        Self {
            uri: None,
            ..Self::default()
        }
    }

    pub fn failing_manifest() -> Self {
        Self {
            fail_manifest: true,
            ..Self::default()
        }
    }

    pub fn failing_close() -> Self {
        Self {
            fail_close: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            step_delay: delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Highest number of concurrent `create_deployment` calls observed.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().expect("calls lock").push(call.into());
    }
}

#[async_trait]
impl Marketplace for StubMarket {
    async fn key_address(&self) -> Result<Option<String>, MarketError> {
        self.record("key_address");
        Ok(self.address.clone())
    }

    async fn import_key(&self, _mnemonic: &str) -> Result<String, MarketError> {
        self.record("import_key");
        Ok("akash1importedkey00000000000000000000000000".to_string())
    }

    async fn create_deployment(&self, _manifest: &Path, dseq: u64) -> Result<(), MarketError> {
        self.record(format!("create_deployment:{dseq}"));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn leases(&self, _owner: &str, dseq: u64) -> Result<Vec<Lease>, MarketError> {
        self.record(format!("leases:{dseq}"));
        Ok(self.leases.clone())
    }

    async fn send_manifest(
        &self,
        _manifest: &Path,
        dseq: u64,
        _lease: &Lease,
    ) -> Result<(), MarketError> {
        self.record(format!("send_manifest:{dseq}"));
        if self.fail_manifest {
            return Err(MarketError::BadOutput("provider rejected manifest".into()));
        }
        Ok(())
    }

    async fn service_uri(&self, dseq: u64, _lease: &Lease) -> Result<Option<String>, MarketError> {
        self.record(format!("service_uri:{dseq}"));
        Ok(self.uri.clone())
    }

    async fn close_deployment(&self, dseq: u64) -> Result<(), MarketError> {
        self.record(format!("close_deployment:{dseq}"));
        if self.fail_close {
            return Err(MarketError::BadOutput("close rejected".into()));
        }
        Ok(())
    }
}

/// A queue whose backing store is permanently unreachable, for exercising
/// the degraded responses.
#[derive(Debug, Default)]
pub struct FailingQueue;

impl FailingQueue {
    fn outage() -> QueueError {
        QueueError::Unavailable("connection refused".to_string())
    }
}

#[async_trait]
impl QueueStore for FailingQueue {
    async fn enqueue(&self, _job: &QueuedJob) -> Result<usize, QueueError> {
        Err(Self::outage())
    }

    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError> {
        Err(Self::outage())
    }

    async fn peek(&self, _limit: usize) -> Result<Vec<QueuedJob>, QueueError> {
        Err(Self::outage())
    }

    async fn clear(&self) -> Result<(), QueueError> {
        Err(Self::outage())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Err(Self::outage())
    }

    fn durable(&self) -> bool {
        true
    }
}

/// A config tuned for tests: target provider set to the stub's, probe
/// disabled, instant polling, small attempt budgets.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.chain.provider = Some(PROVIDER.to_string());
    config.probe.disabled = true;
    config.orchestrator.poll_interval_secs = 0;
    config.orchestrator.lease_poll_attempts = 2;
    config.orchestrator.uri_poll_attempts = 3;
    config
}
