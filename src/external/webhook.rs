use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::{invalid_input_error, upstream_error, Error},
    external::Notifier,
};

#[derive(Serialize)]
struct Notification<'a> {
    recipient_id: Uuid,
    event_type: &'a str,
    payload: serde_json::Value,
}

/// Posts every notification as JSON to a push/SMS gateway.
#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()?;

        Ok(Self { url, client })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[tracing::instrument(skip(self, payload))]
    async fn notify(
        &self,
        recipient_id: Uuid,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<(), Error> {
        let res = self
            .client
            .post(&self.url)
            .json(&Notification {
                recipient_id,
                event_type,
                payload,
            })
            .send()
            .await?;

        let status_code = res.status().as_u16();

        if (400..500).contains(&status_code) {
            return Err(invalid_input_error());
        } else if !res.status().is_success() {
            return Err(upstream_error());
        }

        Ok(())
    }
}
