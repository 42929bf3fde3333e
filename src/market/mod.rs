//! Marketplace boundary.
//!
//! The broker drives deployments through an external marketplace tool. That
//! tool is opaque: everything the orchestrator needs is expressed by the
//! [`Marketplace`] trait, with the real implementation shelling out to the
//! `provider-services` CLI and tests substituting a stub.

mod cli;

pub use cli::ProviderServicesCli;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MarketError;

/// An allocation match between a deployment and a specific provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub gseq: u32,
    pub oseq: u32,
    pub provider: String,
}

#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Address of the signing key, or `None` when no key exists yet.
    async fn key_address(&self) -> Result<Option<String>, MarketError>;

    /// Import the signing key from a recovery mnemonic. Returns its address.
    async fn import_key(&self, mnemonic: &str) -> Result<String, MarketError>;

    /// Submit a deployment creation transaction for the rendered manifest.
    async fn create_deployment(&self, manifest: &Path, dseq: u64) -> Result<(), MarketError>;

    /// All leases currently attached to `dseq`, any provider.
    async fn leases(&self, owner: &str, dseq: u64) -> Result<Vec<Lease>, MarketError>;

    /// Send the rendered manifest to the matched provider.
    async fn send_manifest(
        &self,
        manifest: &Path,
        dseq: u64,
        lease: &Lease,
    ) -> Result<(), MarketError>;

    /// First published reachable address of the first reported service, if
    /// the provider has published one yet.
    async fn service_uri(&self, dseq: u64, lease: &Lease) -> Result<Option<String>, MarketError>;

    /// Close the deployment, releasing the lease.
    async fn close_deployment(&self, dseq: u64) -> Result<(), MarketError>;
}
