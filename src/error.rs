//! Error taxonomy for the broker.
//!
//! One enum per concern, composed into [`BrokerError`] for anything that can
//! surface from an orchestrator run. Wire codes are stable snake_case strings
//! so API consumers can match on them.

use thiserror::Error;

/// Errors from spawning the external marketplace tool.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    /// The process could not be spawned at all.
    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// The process ran and exited non-zero. The message is captured stderr
    /// if present, else stdout, else the exit status text.
    #[error("{program} failed: {message}")]
    Failed { program: String, message: String },
}

/// Errors from the marketplace boundary (CLI invocations and their output).
#[derive(Debug, Clone, Error)]
pub enum MarketError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("unexpected marketplace output: {0}")]
    BadOutput(String),
}

/// Errors from the durable queue backend.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// No backing store is configured or the store is unreachable.
    #[error("queue store unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        QueueError::Unavailable(e.to_string())
    }
}

/// Errors loading configuration from the environment.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Everything an orchestrator run (or the request path in front of it) can
/// fail with. `code()` is the stable wire representation.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Product is not in the allowed set. Rejected before any external call.
    #[error("unknown product: {0}")]
    InvalidProduct(String),

    /// No target provider address is configured. Checked before any
    /// spend-incurring call.
    #[error("no target provider configured")]
    ProviderUnset,

    /// No signing key exists and no import mnemonic is configured.
    #[error("signing identity unavailable: no key and no mnemonic to import")]
    IdentityUnavailable,

    /// Lease polling exhausted its attempt budget without a lease from the
    /// configured provider. Not retried at this layer.
    #[error("no lease from target provider for dseq {dseq}")]
    NoLeaseFromProvider { dseq: u64 },

    #[error("manifest submission failed: {0}")]
    ManifestSendFailed(MarketError),

    #[error("failed to render manifest: {0}")]
    ManifestRenderFailed(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Market(#[from] MarketError),
}

impl BrokerError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidProduct(_) => "invalid_product",
            Self::ProviderUnset => "provider_unset",
            Self::IdentityUnavailable => "identity_unavailable",
            Self::NoLeaseFromProvider { .. } => "no_lease_from_provider",
            Self::ManifestSendFailed(_) => "manifest_send_failed",
            Self::ManifestRenderFailed(_) => "manifest_render_failed",
            Self::Queue(_) => "queue_unavailable",
            Self::Market(_) => "marketplace_error",
        }
    }
}
