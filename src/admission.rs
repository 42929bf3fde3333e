//! Admission gate: may a job run right now?
//!
//! One uncached probe per check; no state is retained between checks.

use serde::Deserialize;

use crate::config::{ProbeConfig, ProbePolicy};

#[derive(Debug, Deserialize)]
struct ProbeBody {
    #[serde(default)]
    status: String,
}

/// Queries the external availability endpoint and yields a boolean
/// "may admit now" signal.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    config: ProbeConfig,
    client: reqwest::Client,
}

impl AdmissionGate {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Returns true when a job may be admitted immediately.
    ///
    /// Disabled checks and a missing probe URL always admit. Probe failures
    /// follow the configured [`ProbePolicy`], fail-closed by default.
    pub async fn is_available(&self) -> bool {
        if self.config.disabled {
            return true;
        }
        let url = match &self.config.url {
            Some(u) => u,
            None => return true,
        };

        match self.probe(url).await {
            Ok(available) => available,
            Err(e) => {
                let assumed = self.config.policy == ProbePolicy::FailOpen;
                tracing::warn!(
                    error = %e,
                    policy = ?self.config.policy,
                    assumed_available = assumed,
                    "busy probe failed"
                );
                assumed
            }
        }
    }

    async fn probe(&self, url: &str) -> Result<bool, reqwest::Error> {
        let body: ProbeBody = self.client.get(url).send().await?.json().await?;
        Ok(body.status == "available")
    }
}
