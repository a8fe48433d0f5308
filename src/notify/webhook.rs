use super::{DeliveryError, Notification, Notifier};
use async_trait::async_trait;
use std::time::Duration;

/// POSTs each notification as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DeliveryError(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| DeliveryError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DeliveryError(format!(
                "webhook answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}
