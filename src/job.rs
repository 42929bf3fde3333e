//! Job request and queue record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BrokerError;

pub const DEFAULT_MINUTES: u64 = 60;

/// Upper bound on a job's lifetime: 30 days. `minutes` arrives off the wire
/// as an arbitrary integer; clamping here keeps every downstream duration
/// computation in range.
pub const MAX_LIFETIME_MINUTES: u64 = 60 * 24 * 30;

/// GPU compute products this broker knows how to provision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Product {
    Whisper,
    Sd,
    Llama,
}

impl Product {
    pub const ALL: [Product; 3] = [Product::Whisper, Product::Sd, Product::Llama];

    /// Validate a wire product name against the allowed set.
    pub fn parse(s: &str) -> Result<Self, BrokerError> {
        match s {
            "whisper" => Ok(Self::Whisper),
            "sd" => Ok(Self::Sd),
            "llama" => Ok(Self::Llama),
            other => Err(BrokerError::InvalidProduct(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whisper => "whisper",
            Self::Sd => "sd",
            Self::Llama => "llama",
        }
    }
}

impl std::fmt::Display for Product {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contact details supplied by the customer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Customer {
    #[serde(default)]
    pub email: Option<String>,
}

/// An inbound job request. Immutable once queued.
///
/// `product` is kept as the raw wire string so unknown products reach the
/// validation step and come back as `invalid_product` rather than a
/// deserialization error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub product: String,
    #[serde(default = "default_minutes")]
    pub minutes: u64,
    #[serde(default)]
    pub customer: Customer,
    /// Opaque payment record, passed through untouched.
    #[serde(default)]
    pub payment: serde_json::Value,
}

fn default_minutes() -> u64 {
    DEFAULT_MINUTES
}

impl JobRequest {
    pub fn new(product: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            minutes: DEFAULT_MINUTES,
            customer: Customer::default(),
            payment: serde_json::Value::Null,
        }
    }

    /// Deployment lifetime, clamped to `[1, MAX_LIFETIME_MINUTES]`.
    pub fn lifetime_minutes(&self) -> u64 {
        self.minutes.clamp(1, MAX_LIFETIME_MINUTES)
    }
}

/// A job as stored in the durable queue. The id exists only to correlate
/// log lines between enqueue and the worker picking it up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: Uuid,
    #[serde(flatten)]
    pub request: JobRequest,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl QueuedJob {
    pub fn new(request: JobRequest, idempotency_key: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            enqueued_at: Utc::now(),
            idempotency_key,
        }
    }
}
