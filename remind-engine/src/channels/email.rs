//! Email channel backed by an HTTP mail API.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{ChannelAdapter, classify_status, classify_transport, shape_mismatch};
use crate::domain::{ChannelError, ChannelErrorCode, ChannelKind, ChannelResponse};
use crate::template::TemplateContent;

/// Email adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAdapterConfig {
    /// Mail API endpoint (JSON POST).
    pub api_url: String,
    /// Bearer token for the mail API.
    pub api_token: Option<String>,
    /// Sender address.
    pub from_address: String,
    /// Recipient addresses.
    pub to_addresses: Vec<String>,
}

/// Email notification adapter.
pub struct EmailAdapter {
    config: EmailAdapterConfig,
    client: Client,
}

impl EmailAdapter {
    pub fn new(config: EmailAdapterConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(
        &self,
        content: &TemplateContent,
    ) -> Result<ChannelResponse, ChannelError> {
        let TemplateContent::Email { subject, body } = content else {
            return Err(shape_mismatch(ChannelKind::Email, content));
        };

        if self.config.to_addresses.is_empty() {
            return Err(ChannelError::permanent(
                ChannelErrorCode::InvalidRecipient,
                "no recipient addresses configured",
            ));
        }

        let payload = json!({
            "from": self.config.from_address,
            "to": self.config.to_addresses,
            "subject": subject,
            "text": body,
        });

        let mut request = self.client.post(&self.config.api_url).json(&payload);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
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
            .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(String::from));

        debug!(subject = %subject, "Email accepted by mail API");
        Ok(ChannelResponse {
            delivered_at: Utc::now(),
            provider_message_id,
        })
    }

    async fn test(&self) -> Result<(), ChannelError> {
        let response = self
            .client
            .head(&self.config.api_url)
            .send()
            .await
            .map_err(classify_transport)?;
        if response.status().is_server_error() {
            return Err(ChannelError::transient(
                ChannelErrorCode::Transport,
                format!("mail API unhealthy: {}", response.status()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> EmailAdapter {
        EmailAdapter::new(EmailAdapterConfig {
            api_url: "https://mail.example.com/v1/send".to_string(),
            api_token: None,
            from_address: "noreply@example.com".to_string(),
            to_addresses: vec!["ada@example.com".to_string()],
        })
    }

    #[tokio::test]
    async fn test_rejects_wrong_content_shape() {
        let err = adapter()
            .send(&TemplateContent::Sms {
                text: "hi".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ChannelErrorCode::MalformedContent);
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_rejects_empty_recipients() {
        let adapter = EmailAdapter::new(EmailAdapterConfig {
            api_url: "https://mail.example.com/v1/send".to_string(),
            api_token: None,
            from_address: "noreply@example.com".to_string(),
            to_addresses: vec![],
        });
        let err = adapter
            .send(&TemplateContent::Email {
                subject: "s".to_string(),
                body: "b".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ChannelErrorCode::InvalidRecipient);
    }
}
