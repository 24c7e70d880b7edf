//! Webhook notification collaborator.
//!
//! Posts `{recipient, template_id, data}` to a configured endpoint, which
//! owns template rendering and delivery (email, SMS).

use async_trait::async_trait;
use reqwest::Client;
use scan_engine::{NotifyError, Notifier};
use serde::Serialize;
use std::time::Duration;

pub struct WebhookNotifier {
    client: Client,
    url: String,
}

#[derive(Serialize)]
struct NotificationPayload<'a> {
    recipient: &'a str,
    template_id: &'a str,
    data: &'a serde_json::Value,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| NotifyError::Http(Box::new(e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(
        &self,
        recipient: &str,
        template_id: &str,
        data: &serde_json::Value,
    ) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&NotificationPayload {
                recipient,
                template_id,
                data,
            })
            .send()
            .await
            .map_err(|e| NotifyError::Http(Box::new(e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected(format!("{} - {}", status, body)));
        }

        tracing::info!(recipient, template_id, "notification sent");
        Ok(())
    }
}
