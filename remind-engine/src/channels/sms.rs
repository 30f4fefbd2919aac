//! SMS channel backed by an SMS gateway.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{ChannelAdapter, classify_status, classify_transport, shape_mismatch};
use crate::domain::{ChannelError, ChannelErrorCode, ChannelKind, ChannelResponse};
use crate::template::TemplateContent;

/// SMS adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsAdapterConfig {
    /// SMS gateway endpoint.
    pub gateway_url: String,
    /// API key for the gateway.
    pub api_key: Option<String>,
    /// Sender number or alphanumeric id.
    pub from_number: String,
    /// Recipient number.
    pub to_number: String,
}

/// SMS notification adapter.
pub struct SmsAdapter {
    config: SmsAdapterConfig,
    client: Client,
}

impl SmsAdapter {
    pub fn new(config: SmsAdapterConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(
        &self,
        content: &TemplateContent,
    ) -> Result<ChannelResponse, ChannelError> {
        let TemplateContent::Sms { text } = content else {
            return Err(shape_mismatch(ChannelKind::Sms, content));
        };

        let payload = json!({
            "from": self.config.from_number,
            "to": self.config.to_number,
            "text": text,
        });

        let mut request = self.client.post(&self.config.gateway_url).json(&payload);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(
                status,
                &body,
                ChannelErrorCode::InvalidRecipient,
            ));
        }

        let provider_message_id = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| {
                v.get("message_id")
                    .and_then(|id| id.as_str())
                    .map(String::from)
            });

        debug!(to = %self.config.to_number, "SMS accepted by gateway");
        Ok(ChannelResponse {
            delivered_at: Utc::now(),
            provider_message_id,
        })
    }

    async fn test(&self) -> Result<(), ChannelError> {
        let response = self
            .client
            .head(&self.config.gateway_url)
            .send()
            .await
            .map_err(classify_transport)?;
        if response.status().is_server_error() {
            return Err(ChannelError::transient(
                ChannelErrorCode::Transport,
                format!("sms gateway unhealthy: {}", response.status()),
            ));
        }
        Ok(())
    }
}
