//! `provider-services` CLI implementation of the marketplace boundary.
//!
//! Chain endpoint, chain id, and keyring backend travel as environment
//! overrides on every invocation; per-call coordinates travel as arguments.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ChainConfig;
use crate::error::{ExecError, MarketError};
use crate::exec::CommandRunner;

use super::{Lease, Marketplace};

const PROGRAM: &str = "provider-services";

pub struct ProviderServicesCli {
    chain: ChainConfig,
    runner: CommandRunner,
}

impl ProviderServicesCli {
    pub fn new(chain: ChainConfig) -> Self {
        Self {
            chain,
            runner: CommandRunner,
        }
    }

    fn env(&self) -> Vec<(String, String)> {
        vec![
            ("AKASH_NODE".into(), self.chain.node.clone()),
            ("AKASH_CHAIN_ID".into(), self.chain.chain_id.clone()),
            (
                "AKASH_KEYRING_BACKEND".into(),
                self.chain.keyring_backend.clone(),
            ),
            ("AKASH_OUTPUT".into(), "json".into()),
        ]
    }

    async fn run(&self, args: &[String]) -> Result<String, MarketError> {
        Ok(self.runner.run(PROGRAM, args, &self.env()).await?)
    }
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|i| i.to_string()).collect()
}

// -- CLI output shapes --

#[derive(Debug, Deserialize)]
struct KeyInfo {
    address: String,
}

#[derive(Debug, Deserialize)]
struct LeaseListResponse {
    #[serde(default)]
    leases: Vec<LeaseEntry>,
}

#[derive(Debug, Deserialize)]
struct LeaseEntry {
    lease: LeaseBody,
}

#[derive(Debug, Deserialize)]
struct LeaseBody {
    lease_id: LeaseId,
}

#[derive(Debug, Deserialize)]
struct LeaseId {
    gseq: u32,
    oseq: u32,
    provider: String,
}

#[derive(Debug, Deserialize)]
struct LeaseStatus {
    #[serde(default)]
    services: std::collections::BTreeMap<String, ServiceStatus>,
}

#[derive(Debug, Deserialize)]
struct ServiceStatus {
    #[serde(default)]
    uris: Vec<String>,
}

fn parse_leases(raw: &str) -> Result<Vec<Lease>, MarketError> {
    let parsed: LeaseListResponse =
        serde_json::from_str(raw).map_err(|e| MarketError::BadOutput(e.to_string()))?;
    Ok(parsed
        .leases
        .into_iter()
        .map(|entry| Lease {
            gseq: entry.lease.lease_id.gseq,
            oseq: entry.lease.lease_id.oseq,
            provider: entry.lease.lease_id.provider,
        })
        .collect())
}

fn parse_first_uri(raw: &str) -> Result<Option<String>, MarketError> {
    let status: LeaseStatus =
        serde_json::from_str(raw).map_err(|e| MarketError::BadOutput(e.to_string()))?;
    Ok(status
        .services
        .into_values()
        .find_map(|svc| svc.uris.into_iter().next()))
}

#[async_trait]
impl Marketplace for ProviderServicesCli {
    async fn key_address(&self) -> Result<Option<String>, MarketError> {
        let show = args(&["keys", "show", &self.chain.key_name, "-a"]);
        match self.runner.run(PROGRAM, &show, &self.env()).await {
            Ok(address) => Ok(Some(address)),
            // Non-zero exit means the keyring has no such key. A spawn
            // failure means the tool itself is missing and must surface.
            Err(ExecError::Failed { .. }) => Ok(None),
            Err(e @ ExecError::Spawn { .. }) => Err(e.into()),
        }
    }

    async fn import_key(&self, mnemonic: &str) -> Result<String, MarketError> {
        let add = args(&["keys", "add", &self.chain.key_name, "--recover"]);
        let out = self
            .runner
            .run_with_stdin(PROGRAM, &add, &self.env(), Some(mnemonic))
            .await?;
        let info: KeyInfo =
            serde_json::from_str(&out).map_err(|e| MarketError::BadOutput(e.to_string()))?;
        Ok(info.address)
    }

    async fn create_deployment(&self, manifest: &Path, dseq: u64) -> Result<(), MarketError> {
        let create = args(&[
            "tx",
            "deployment",
            "create",
            &manifest.display().to_string(),
            "--dseq",
            &dseq.to_string(),
            "--deposit",
            &self.chain.min_deposit,
            "--from",
            &self.chain.key_name,
            "--gas",
            "auto",
            "--yes",
        ]);
        self.run(&create).await?;
        Ok(())
    }

    async fn leases(&self, owner: &str, dseq: u64) -> Result<Vec<Lease>, MarketError> {
        let list = args(&[
            "query",
            "market",
            "lease",
            "list",
            "--owner",
            owner,
            "--dseq",
            &dseq.to_string(),
        ]);
        let out = self.run(&list).await?;
        parse_leases(&out)
    }

    async fn send_manifest(
        &self,
        manifest: &Path,
        dseq: u64,
        lease: &Lease,
    ) -> Result<(), MarketError> {
        let send = args(&[
            "send-manifest",
            &manifest.display().to_string(),
            "--dseq",
            &dseq.to_string(),
            "--gseq",
            &lease.gseq.to_string(),
            "--oseq",
            &lease.oseq.to_string(),
            "--provider",
            &lease.provider,
            "--from",
            &self.chain.key_name,
        ]);
        self.run(&send).await?;
        Ok(())
    }

    async fn service_uri(&self, dseq: u64, lease: &Lease) -> Result<Option<String>, MarketError> {
        let status = args(&[
            "lease-status",
            "--dseq",
            &dseq.to_string(),
            "--gseq",
            &lease.gseq.to_string(),
            "--oseq",
            &lease.oseq.to_string(),
            "--provider",
            &lease.provider,
            "--from",
            &self.chain.key_name,
        ]);
        let out = self.run(&status).await?;
        parse_first_uri(&out)
    }

    async fn close_deployment(&self, dseq: u64) -> Result<(), MarketError> {
        let close = args(&[
            "tx",
            "deployment",
            "close",
            "--dseq",
            &dseq.to_string(),
            "--from",
            &self.chain.key_name,
            "--gas",
            "auto",
            "--yes",
        ]);
        self.run(&close).await?;
        Ok(())
    }
}
