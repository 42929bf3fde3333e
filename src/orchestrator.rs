//! The job lifecycle orchestrator.
//!
//! Drives one accepted job end-to-end: validate, resolve the signing
//! identity, create the deployment, wait for a lease from the target
//! provider, push the manifest, discover the service endpoint, notify, and
//! schedule teardown. Validation and configuration failures happen before
//! any external call; bounded polling exists only in the lease and URI wait
//! loops.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::config::Config;
use crate::error::BrokerError;
use crate::job::{JobRequest, Product};
use crate::manifest;
use crate::market::{Lease, Marketplace};
use crate::notify::{Notifier, ReadyEvent};
use crate::teardown::TeardownScheduler;

/// What a finished run reports back to the caller.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub dseq: Option<u64>,
    /// Best-effort: a session can complete successfully without one.
    pub uri: Option<String>,
    pub dry_run: bool,
}

/// Ephemeral per-run state. Never persisted; a restart mid-lifecycle loses
/// the session (its teardown obligation is persisted separately).
struct DeploymentSession {
    owner: String,
    dseq: u64,
    manifest: tempfile::TempPath,
    lease: Option<Lease>,
    service_uri: Option<String>,
}

pub struct Orchestrator {
    config: Arc<Config>,
    market: Arc<dyn Marketplace>,
    notifier: Arc<Notifier>,
    teardown: Arc<TeardownScheduler>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        market: Arc<dyn Marketplace>,
        notifier: Arc<Notifier>,
        teardown: Arc<TeardownScheduler>,
    ) -> Self {
        Self {
            config,
            market,
            notifier,
            teardown,
        }
    }

    /// Run one job to completion.
    pub async fn run(&self, job: &JobRequest) -> Result<JobOutcome, BrokerError> {
        // Validation first: an unknown product is rejected with zero side
        // effects, before anything external is touched.
        let product = Product::parse(&job.product)?;

        if self.config.orchestrator.dry_run {
            return Ok(self.dry_run(product, job));
        }

        // Configuration failures fail fast, ahead of any spend-incurring
        // call. Key import below does write the keyring, which is why the
        // provider check comes first.
        let provider = self
            .config
            .chain
            .provider
            .clone()
            .ok_or(BrokerError::ProviderUnset)?;

        let owner = self.resolve_identity().await?;

        // dseq derives from wall-clock seconds. Two sessions started within
        // the same tick collide; accepted as a documented edge case.
        let dseq = Utc::now().timestamp().max(0) as u64;

        let mut session = DeploymentSession {
            owner,
            dseq,
            manifest: manifest::render(product, &provider)?,
            lease: None,
            service_uri: None,
        };

        self.market
            .create_deployment(&session.manifest, session.dseq)
            .await?;
        tracing::info!(dseq = session.dseq, product = %product, "deployment created");

        let lease = self.wait_for_lease(&session, &provider).await?;
        tracing::info!(
            dseq = session.dseq,
            provider = %lease.provider,
            gseq = lease.gseq,
            oseq = lease.oseq,
            "lease acquired"
        );
        self.market
            .send_manifest(&session.manifest, session.dseq, &lease)
            .await
            .map_err(BrokerError::ManifestSendFailed)?;
        tracing::info!(dseq = session.dseq, "manifest sent");
        session.lease = Some(lease);

        // Best-effort URI discovery: exhaustion is soft, the session still
        // completes.
        session.service_uri = self.wait_for_uri(&session).await;

        if let Some(uri) = &session.service_uri {
            self.notify_ready(product, job, uri.clone(), false);
        }

        let lifetime = Duration::from_secs(job.lifetime_minutes().saturating_mul(60));
        self.teardown.schedule(session.dseq, lifetime).await;

        Ok(JobOutcome {
            dseq: Some(session.dseq),
            uri: session.service_uri,
            dry_run: false,
        })
    }

    /// Simulated path: no marketplace interaction at all.
    fn dry_run(&self, product: Product, job: &JobRequest) -> JobOutcome {
        let uri = format!(
            "https://dryrun.gpu-broker.internal/{product}-{}",
            Utc::now().timestamp()
        );
        tracing::info!(product = %product, uri = %uri, "dry run accepted");
        self.notify_ready(product, job, uri.clone(), true);
        JobOutcome {
            dseq: None,
            uri: Some(uri),
            dry_run: true,
        }
    }

    /// Resolve the signing address, importing the key from the configured
    /// mnemonic when the keyring is empty.
    async fn resolve_identity(&self) -> Result<String, BrokerError> {
        if let Some(address) = self.market.key_address().await? {
            return Ok(address);
        }
        match &self.config.chain.mnemonic {
            Some(mnemonic) => {
                let address = self.market.import_key(mnemonic).await?;
                tracing::info!(%address, "imported signing key");
                Ok(address)
            }
            None => Err(BrokerError::IdentityUnavailable),
        }
    }

    /// Poll for a lease from the target provider. Fixed interval, fixed
    /// attempt budget; leases from other providers are ignored.
    async fn wait_for_lease(
        &self,
        session: &DeploymentSession,
        provider: &str,
    ) -> Result<Lease, BrokerError> {
        let tuning = &self.config.orchestrator;
        for attempt in 1..=tuning.lease_poll_attempts {
            let leases = self.market.leases(&session.owner, session.dseq).await?;
            if let Some(lease) = leases.into_iter().find(|l| l.provider == provider) {
                return Ok(lease);
            }
            tracing::debug!(
                dseq = session.dseq,
                attempt,
                budget = tuning.lease_poll_attempts,
                "no lease from target provider yet"
            );
            if attempt < tuning.lease_poll_attempts {
                tokio::time::sleep(Duration::from_secs(tuning.poll_interval_secs)).await;
            }
        }
        Err(BrokerError::NoLeaseFromProvider { dseq: session.dseq })
    }

    /// Poll lease status for the first published address. Poll errors and an
    /// exhausted budget are both soft: the caller gets `None`.
    async fn wait_for_uri(&self, session: &DeploymentSession) -> Option<String> {
        let lease = session.lease.as_ref()?;
        let dseq = session.dseq;
        let tuning = &self.config.orchestrator;
        for attempt in 1..=tuning.uri_poll_attempts {
            match self.market.service_uri(dseq, lease).await {
                Ok(Some(uri)) => return Some(uri),
                Ok(None) => {
                    tracing::debug!(dseq, attempt, "no service URI published yet");
                }
                Err(e) => {
                    tracing::debug!(dseq, attempt, error = %e, "lease status poll failed");
                }
            }
            if attempt < tuning.uri_poll_attempts {
                tokio::time::sleep(Duration::from_secs(tuning.poll_interval_secs)).await;
            }
        }
        tracing::warn!(dseq, "service URI not discovered within budget");
        None
    }

    /// Fire-and-forget readiness notification. The result is deliberately
    /// discarded: webhook delivery must never affect the session outcome.
    fn notify_ready(&self, product: Product, job: &JobRequest, uri: String, dry_run: bool) {
        let email = match &job.customer.email {
            Some(e) => e.clone(),
            None => return,
        };
        let notifier = Arc::clone(&self.notifier);
        let minutes = job.lifetime_minutes();
        tokio::spawn(async move {
            let event = ReadyEvent {
                email: &email,
                uri: &uri,
                product,
                minutes,
                dry_run,
            };
            if let Err(e) = notifier.send(&event).await {
                tracing::warn!(error = %e, "ready notification failed");
            }
        });
    }
}
