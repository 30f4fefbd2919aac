//! In-app channel delivering over an in-process broadcast.
//!
//! Connected UI sessions subscribe to the broadcast; a socket transport can
//! wrap the receiver without the engine knowing about it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::{ChannelAdapter, shape_mismatch};
use crate::domain::{ChannelError, ChannelKind, ChannelResponse};
use crate::template::TemplateContent;

/// A delivered in-app notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InAppMessage {
    pub id: String,
    pub title: String,
    pub body: String,
    pub delivered_at: DateTime<Utc>,
}

/// In-app notification adapter.
pub struct InAppAdapter {
    tx: broadcast::Sender<InAppMessage>,
}

impl InAppAdapter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to delivered in-app messages.
    pub fn subscribe(&self) -> broadcast::Receiver<InAppMessage> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl ChannelAdapter for InAppAdapter {
    fn channel(&self) -> ChannelKind {
        ChannelKind::InApp
    }

    async fn send(
        &self,
        content: &TemplateContent,
    ) -> Result<ChannelResponse, ChannelError> {
        let TemplateContent::InApp { title, body } = content else {
            return Err(shape_mismatch(ChannelKind::InApp, content));
        };

        let message = InAppMessage {
            id: Uuid::new_v4().to_string(),
            title: title.clone(),
            body: body.clone(),
            delivered_at: Utc::now(),
        };
        let id = message.id.clone();

        // No subscribers just means no session is currently connected;
        // delivery into the broadcast still counts.
        let _ = self.tx.send(message);

        debug!(message_id = %id, "In-app notification broadcast");
        Ok(ChannelResponse {
            delivered_at: Utc::now(),
            provider_message_id: Some(id),
        })
    }

    async fn test(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_reaches_subscriber() {
        let adapter = InAppAdapter::new(8);
        let mut rx = adapter.subscribe();

        let response = adapter
            .send(&TemplateContent::InApp {
                title: "Reminder".to_string(),
                body: "Stand-up in 5 minutes".to_string(),
            })
            .await
            .unwrap();

        let message = rx.try_recv().unwrap();
        assert_eq!(message.title, "Reminder");
        assert_eq!(response.provider_message_id, Some(message.id));
    }

    #[tokio::test]
    async fn test_send_without_subscribers_succeeds() {
        let adapter = InAppAdapter::new(8);
        let result = adapter
            .send(&TemplateContent::InApp {
                title: "t".to_string(),
                body: "b".to_string(),
            })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_wrong_content_shape() {
        let adapter = InAppAdapter::new(8);
        let err = adapter
            .send(&TemplateContent::Sms {
                text: "hi".to_string(),
            })
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }
}
