//! Readiness webhook delivery.
//!
//! Delivery is best-effort by contract: callers spawn it fire-and-forget and
//! deliberately discard the result. A webhook outage never affects a session.

use serde::Serialize;

use crate::config::NotifyConfig;
use crate::job::Product;

#[derive(Debug, Serialize)]
pub struct ReadyEvent<'a> {
    pub email: &'a str,
    pub uri: &'a str,
    pub product: Product,
    pub minutes: u64,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct Notifier {
    config: NotifyConfig,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(config: NotifyConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Deliver a job-ready event. No-op when no URL is configured.
    pub async fn send(&self, event: &ReadyEvent<'_>) -> Result<(), reqwest::Error> {
        let url = match &self.config.url {
            Some(u) => u,
            None => return Ok(()),
        };

        let mut req = self.client.post(url).json(event);
        if let Some(token) = &self.config.token {
            req = req.header("X-Notify-Token", token);
        }
        req.send().await?.error_for_status()?;

        tracing::info!(product = %event.product, "ready notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_url_is_a_noop() {
        let notifier = Notifier::new(NotifyConfig::default());
        let event = ReadyEvent {
            email: "user@example.com",
            uri: "https://sd.example.com",
            product: Product::Sd,
            minutes: 30,
            dry_run: false,
        };
        assert!(notifier.send(&event).await.is_ok());
    }

    #[test]
    fn event_serializes_with_product_name() {
        let event = ReadyEvent {
            email: "user@example.com",
            uri: "https://sd.example.com",
            product: Product::Sd,
            minutes: 30,
            dry_run: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["product"], "sd");
        assert_eq!(json["dry_run"], true);
    }
}
