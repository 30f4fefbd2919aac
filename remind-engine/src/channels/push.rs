//! Push channel backed by a push gateway.
//!
//! A 404/410 from the gateway means the subscription is gone (the user
//! uninstalled or revoked push); that is a permanent failure, never retried.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{ChannelAdapter, classify_status, classify_transport, shape_mismatch};
use crate::domain::{ChannelError, ChannelErrorCode, ChannelKind, ChannelResponse};
use crate::template::TemplateContent;

/// Push adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushAdapterConfig {
    /// Push gateway endpoint.
    pub gateway_url: String,
    /// Bearer token for the gateway.
    pub auth_token: Option<String>,
    /// Device/subscription identifier the gateway routes on.
    pub subscription_id: String,
}

/// Push notification adapter.
pub struct PushAdapter {
    config: PushAdapterConfig,
    client: Client,
}

impl PushAdapter {
    pub fn new(config: PushAdapterConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for PushAdapter {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Push
    }

    async fn send(
        &self,
        content: &TemplateContent,
    ) -> Result<ChannelResponse, ChannelError> {
        let TemplateContent::Push { title, body } = content else {
            return Err(shape_mismatch(ChannelKind::Push, content));
        };

        let payload = json!({
            "subscription": self.config.subscription_id,
            "title": title,
            "body": body,
        });

        let mut request = self.client.post(&self.config.gateway_url).json(&payload);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(
                status,
                &body,
                ChannelErrorCode::Unsubscribed,
            ));
        }

        debug!(title = %title, "Push accepted by gateway");
        Ok(ChannelResponse {
            delivered_at: Utc::now(),
            provider_message_id: None,
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
                format!("push gateway unhealthy: {}", response.status()),
            ));
        }
        Ok(())
    }
}
