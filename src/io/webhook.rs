//! HTTP webhook notifier - POSTs each alert record as JSON

use crate::domain::alert::AlertRecord;
use crate::services::alert_worker::AlertSink;
use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build webhook HTTP client")?;
        info!(url = %url, timeout_ms = %timeout.as_millis(), "webhook_notifier_started");
        Ok(Self { client, url: url.to_string() })
    }
}

#[async_trait]
impl AlertSink for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, alert: &AlertRecord) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .with_context(|| format!("POST {}", self.url))?;
        let status = response.status();
        response.error_for_status().with_context(|| format!("POST {}", self.url))?;
        debug!(alert_id = %alert.id, status = %status.as_u16(), "webhook_delivered");
        Ok(())
    }
}
