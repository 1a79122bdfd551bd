use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use crate::errors::ScanlineError;
use super::{ChangeMessage, Notifier};

/// POSTs each change message as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ScanlineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScanlineError::Config(format!("Failed to build webhook client: {}", e)))?;
        Ok(Self { client, url: url.to_string() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, message: &ChangeMessage) -> Result<(), ScanlineError> {
        let resp = self.client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .map_err(|e| ScanlineError::Notification(format!("Webhook request failed: {}", e)))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(ScanlineError::Throttled("Webhook rate limit".into()));
        }
        if !status.is_success() {
            return Err(ScanlineError::Notification(format!("Webhook returned {}", status)));
        }

        debug!(url = %self.url, job_id = %message.job_id, "Webhook delivered");
        Ok(())
    }
}
