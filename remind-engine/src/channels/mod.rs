//! Delivery channel adapters.
//!
//! Each channel implements the uniform send contract and classifies its own
//! failures as retryable or permanent. The engine holds a fixed
//! [`AdapterSet`] matched over [`ChannelKind`]; new channels are added by
//! extending the variant set, not by runtime lookup tables.

mod email;
mod in_app;
mod push;
mod sms;

pub use email::{EmailAdapter, EmailAdapterConfig};
pub use in_app::{InAppAdapter, InAppMessage};
pub use push::{PushAdapter, PushAdapterConfig};
pub use sms::{SmsAdapter, SmsAdapterConfig};

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::domain::{ChannelError, ChannelErrorCode, ChannelKind, ChannelResponse};
use crate::template::TemplateContent;

/// Uniform send capability implemented per channel.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// The channel this adapter delivers on.
    fn channel(&self) -> ChannelKind;

    /// Deliver rendered content. The dispatcher bounds this call with a
    /// timeout; the adapter only classifies its own transport outcome.
    async fn send(&self, content: &TemplateContent)
    -> Result<ChannelResponse, ChannelError>;

    /// Check connectivity/configuration without delivering to a user.
    async fn test(&self) -> Result<(), ChannelError>;
}

/// The fixed set of configured adapters, one slot per channel variant.
#[derive(Default, Clone)]
pub struct AdapterSet {
    email: Option<Arc<dyn ChannelAdapter>>,
    push: Option<Arc<dyn ChannelAdapter>>,
    sms: Option<Arc<dyn ChannelAdapter>>,
    in_app: Option<Arc<dyn ChannelAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter in the slot its `channel()` names.
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        let slot = match adapter.channel() {
            ChannelKind::Email => &mut self.email,
            ChannelKind::Push => &mut self.push,
            ChannelKind::Sms => &mut self.sms,
            ChannelKind::InApp => &mut self.in_app,
        };
        *slot = Some(adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, channel: ChannelKind) -> Option<&Arc<dyn ChannelAdapter>> {
        match channel {
            ChannelKind::Email => self.email.as_ref(),
            ChannelKind::Push => self.push.as_ref(),
            ChannelKind::Sms => self.sms.as_ref(),
            ChannelKind::InApp => self.in_app.as_ref(),
        }
    }

    /// Channels that currently have an adapter.
    pub fn registered(&self) -> Vec<ChannelKind> {
        ChannelKind::ALL
            .into_iter()
            .filter(|c| self.get(*c).is_some())
            .collect()
    }
}

/// Classify an HTTP gateway status into a channel error.
///
/// `gone_code` names the permanent failure a 404/410 means for the channel
/// (stale push subscription vs. unknown recipient).
pub(crate) fn classify_status(
    status: StatusCode,
    body: &str,
    gone_code: ChannelErrorCode,
) -> ChannelError {
    let message = format!("gateway returned {status}: {body}");
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            ChannelError::transient(ChannelErrorCode::RateLimited, message)
        }
        StatusCode::REQUEST_TIMEOUT => ChannelError::transient(ChannelErrorCode::Timeout, message),
        StatusCode::NOT_FOUND | StatusCode::GONE => ChannelError::permanent(gone_code, message),
        s if s.is_server_error() => ChannelError::transient(ChannelErrorCode::Transport, message),
        _ => ChannelError::permanent(ChannelErrorCode::MalformedContent, message),
    }
}

/// Classify a reqwest transport error. All transport faults are transient.
pub(crate) fn classify_transport(err: reqwest::Error) -> ChannelError {
    if err.is_timeout() {
        ChannelError::transient(ChannelErrorCode::Timeout, err.to_string())
    } else {
        ChannelError::transient(ChannelErrorCode::Transport, err.to_string())
    }
}

/// The adapter received content rendered for a different channel.
pub(crate) fn shape_mismatch(expected: ChannelKind, got: &TemplateContent) -> ChannelError {
    ChannelError::permanent(
        ChannelErrorCode::MalformedContent,
        format!(
            "content rendered for channel {} handed to {} adapter",
            got.channel(),
            expected
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct NoopAdapter(ChannelKind);

    #[async_trait]
    impl ChannelAdapter for NoopAdapter {
        fn channel(&self) -> ChannelKind {
            self.0
        }

        async fn send(
            &self,
            _content: &TemplateContent,
        ) -> Result<ChannelResponse, ChannelError> {
            Ok(ChannelResponse {
                delivered_at: Utc::now(),
                provider_message_id: None,
            })
        }

        async fn test(&self) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[test]
    fn test_adapter_set_slots() {
        let set = AdapterSet::new()
            .with(Arc::new(NoopAdapter(ChannelKind::Email)))
            .with(Arc::new(NoopAdapter(ChannelKind::InApp)));

        assert!(set.get(ChannelKind::Email).is_some());
        assert!(set.get(ChannelKind::InApp).is_some());
        assert!(set.get(ChannelKind::Push).is_none());
        assert_eq!(
            set.registered(),
            vec![ChannelKind::Email, ChannelKind::InApp]
        );
    }

    #[test]
    fn test_classify_status() {
        let e = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            "slow down",
            ChannelErrorCode::InvalidRecipient,
        );
        assert_eq!(e.code, ChannelErrorCode::RateLimited);
        assert!(e.retryable);

        let e = classify_status(
            StatusCode::GONE,
            "",
            ChannelErrorCode::Unsubscribed,
        );
        assert_eq!(e.code, ChannelErrorCode::Unsubscribed);
        assert!(!e.retryable);

        let e = classify_status(
            StatusCode::BAD_GATEWAY,
            "",
            ChannelErrorCode::InvalidRecipient,
        );
        assert_eq!(e.code, ChannelErrorCode::Transport);
        assert!(e.retryable);

        let e = classify_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            "bad payload",
            ChannelErrorCode::InvalidRecipient,
        );
        assert_eq!(e.code, ChannelErrorCode::MalformedContent);
        assert!(!e.retryable);
    }
}
