//! Broker configuration.
//!
//! Everything is resolved from environment variables once at startup into a
//! plain [`Config`] struct that is passed by reference into each component.
//! Orchestration logic never reads the environment directly.

pub(crate) mod helpers;

use std::net::SocketAddr;

use crate::error::ConfigError;
use helpers::{optional_env, parse_bool_env, parse_optional_env, parse_string_env};

/// What to do when the busy probe itself fails (network error, malformed
/// body). Applied uniformly, never decided per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePolicy {
    /// Treat a probe failure as available. Prefers throughput.
    FailOpen,
    /// Treat a probe failure as unavailable. Prefers preserving queued work
    /// over risking a double-booked GPU. The default.
    FailClosed,
}

impl std::str::FromStr for ProbePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_open" | "open" => Ok(Self::FailOpen),
            "fail_closed" | "closed" => Ok(Self::FailClosed),
            other => Err(format!("expected fail_open or fail_closed, got {other:?}")),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl ServerConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            listen: parse_optional_env("LISTEN_ADDR", defaults.listen)?,
        })
    }
}

/// Chain and signing settings for the marketplace CLI.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// RPC node endpoint, exported as `AKASH_NODE` to the CLI.
    pub node: String,
    /// Chain identifier, exported as `AKASH_CHAIN_ID`.
    pub chain_id: String,
    /// Name of the signing account in the keyring.
    pub key_name: String,
    /// Recovery mnemonic used to import the key when it does not exist yet.
    pub mnemonic: Option<String>,
    /// Keyring backend (`test`, `os`, `file`).
    pub keyring_backend: String,
    /// Target provider address. Leases from any other provider are ignored.
    pub provider: Option<String>,
    /// Minimum deposit attached to deployment creation, e.g. `500000uakt`.
    pub min_deposit: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            node: "https://rpc.akashnet.net:443".to_string(),
            chain_id: "akashnet-2".to_string(),
            key_name: "broker".to_string(),
            mnemonic: None,
            keyring_backend: "test".to_string(),
            provider: None,
            min_deposit: "500000uakt".to_string(),
        }
    }
}

impl ChainConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            node: parse_string_env("AKASH_NODE", defaults.node)?,
            chain_id: parse_string_env("AKASH_CHAIN_ID", defaults.chain_id)?,
            key_name: parse_string_env("AKASH_KEY_NAME", defaults.key_name)?,
            mnemonic: optional_env("AKASH_MNEMONIC")?,
            keyring_backend: parse_string_env("AKASH_KEYRING_BACKEND", defaults.keyring_backend)?,
            provider: optional_env("AKASH_PROVIDER")?,
            min_deposit: parse_string_env("AKASH_MIN_DEPOSIT", defaults.min_deposit)?,
        })
    }
}

/// Busy-probe settings for the admission gate.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Skip the probe entirely and always admit.
    pub disabled: bool,
    /// Probe endpoint. Absent means always admit.
    pub url: Option<String>,
    pub policy: ProbePolicy,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            url: None,
            policy: ProbePolicy::FailClosed,
        }
    }
}

impl ProbeConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let policy = match optional_env("BUSY_PROBE_POLICY")? {
            None => ProbePolicy::FailClosed,
            Some(v) => v.parse().map_err(|reason| ConfigError::Invalid {
                key: "BUSY_PROBE_POLICY".to_string(),
                reason,
            })?,
        };
        Ok(Self {
            disabled: parse_bool_env("BUSY_CHECK_DISABLED", false)?,
            url: optional_env("BUSY_PROBE_URL")?,
            policy,
        })
    }
}

/// Queue settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// When false, busy requests are rejected with 409 instead of queued.
    pub enabled: bool,
    /// Redis connection URL. Absent selects the non-durable memory backend.
    pub redis_url: Option<String>,
    /// List key holding pending jobs.
    pub key: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redis_url: None,
            key: "gpu_broker:jobs".to_string(),
        }
    }
}

impl QueueConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            enabled: parse_bool_env("QUEUE_ENABLED", defaults.enabled)?,
            redis_url: optional_env("REDIS_URL")?,
            key: parse_string_env("QUEUE_KEY", defaults.key)?,
        })
    }
}

/// Outbound readiness webhook settings.
#[derive(Debug, Clone, Default)]
pub struct NotifyConfig {
    pub url: Option<String>,
    /// Shared secret sent as `X-Notify-Token`.
    pub token: Option<String>,
}

impl NotifyConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            url: optional_env("NOTIFY_URL")?,
            token: optional_env("NOTIFY_TOKEN")?,
        })
    }
}

/// Admin surface settings.
#[derive(Debug, Clone, Default)]
pub struct AdminConfig {
    /// Shared secret for `POST /admin/queue/clear`. Absent means the
    /// operation is always denied.
    pub token: Option<String>,
}

impl AdminConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            token: optional_env("ADMIN_TOKEN")?,
        })
    }
}

/// Orchestrator tuning. The attempt budgets are fixed constants, never
/// derived from the job's requested minutes.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Simulate success without contacting the marketplace.
    pub dry_run: bool,
    /// Seconds between polls for lease and URI discovery.
    pub poll_interval_secs: u64,
    /// Attempt budget while waiting for a lease (the shorter budget).
    pub lease_poll_attempts: u32,
    /// Attempt budget while waiting for a published URI (the longer budget).
    pub uri_poll_attempts: u32,
    /// Seconds between queue worker ticks.
    pub worker_tick_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            poll_interval_secs: 5,
            lease_poll_attempts: 12,
            uri_poll_attempts: 30,
            worker_tick_secs: 15,
        }
    }
}

impl OrchestratorConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            dry_run: parse_bool_env("DRY_RUN", defaults.dry_run)?,
            poll_interval_secs: parse_optional_env(
                "POLL_INTERVAL_SECS",
                defaults.poll_interval_secs,
            )?,
            lease_poll_attempts: parse_optional_env(
                "LEASE_POLL_ATTEMPTS",
                defaults.lease_poll_attempts,
            )?,
            uri_poll_attempts: parse_optional_env("URI_POLL_ATTEMPTS", defaults.uri_poll_attempts)?,
            worker_tick_secs: parse_optional_env("WORKER_TICK_SECS", defaults.worker_tick_secs)?,
        })
    }
}

/// Main configuration, constructed once at startup.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub chain: ChainConfig,
    pub probe: ProbeConfig,
    pub queue: QueueConfig,
    pub notify: NotifyConfig,
    pub admin: AdminConfig,
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::resolve()?,
            chain: ChainConfig::resolve()?,
            probe: ProbeConfig::resolve()?,
            queue: QueueConfig::resolve()?,
            notify: NotifyConfig::resolve()?,
            admin: AdminConfig::resolve()?,
            orchestrator: OrchestratorConfig::resolve()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_policy_parses() {
        assert_eq!("fail_open".parse::<ProbePolicy>().unwrap(), ProbePolicy::FailOpen);
        assert_eq!("closed".parse::<ProbePolicy>().unwrap(), ProbePolicy::FailClosed);
        assert!("sometimes".parse::<ProbePolicy>().is_err());
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(!cfg.orchestrator.dry_run);
        assert_eq!(cfg.orchestrator.poll_interval_secs, 5);
        assert!(cfg.orchestrator.lease_poll_attempts < cfg.orchestrator.uri_poll_attempts);
        assert_eq!(cfg.probe.policy, ProbePolicy::FailClosed);
        assert!(!cfg.queue.enabled);
        assert!(cfg.admin.token.is_none());
    }
}
