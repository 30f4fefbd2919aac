//! Delivery channels and their per-account configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A delivery medium with its own adapter and content shape.
///
/// New channels are added by extending this enum and the adapter set,
/// not by runtime lookup tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Push,
    Sms,
    InApp,
}

impl ChannelKind {
    /// All supported channels, in a stable order.
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Email,
        ChannelKind::Push,
        ChannelKind::Sms,
        ChannelKind::InApp,
    ];

    /// Canonical channel name (snake_case).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Push => "push",
            Self::Sms => "sms",
            Self::InApp => "in_app",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sliding-window send quota attached to a channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Maximum sends allowed within any window.
    pub max_per_window: u32,
    /// Window duration in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_per_window: 60,
            window_secs: 60,
        }
    }
}

/// Per-(account, channel) delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// The channel this configuration applies to.
    pub channel: ChannelKind,
    /// Owning account.
    pub account_id: String,
    /// Whether delivery on this channel is enabled.
    pub enabled: bool,
    /// Send quota for this (account, channel) pair.
    #[serde(default)]
    pub rate_limit: RateLimitPolicy,
}

/// Success payload reported by a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelResponse {
    /// When the provider accepted the message.
    pub delivered_at: DateTime<Utc>,
    /// Provider-assigned message id, when one is reported.
    pub provider_message_id: Option<String>,
}

/// Classification of a channel delivery failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelErrorCode {
    /// Send quota exhausted; always retryable.
    RateLimited,
    /// The bounded send timeout elapsed.
    Timeout,
    /// Transport-level fault (connect/DNS/5xx).
    Transport,
    /// The recipient address/number does not exist.
    InvalidRecipient,
    /// The recipient opted out or the subscription is gone.
    Unsubscribed,
    /// The provider rejected the content itself.
    MalformedContent,
    /// Template rendering failed before any send was attempted.
    Render,
    /// No adapter is registered for the requested channel.
    UnsupportedChannel,
}

impl ChannelErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::InvalidRecipient => "invalid_recipient",
            Self::Unsubscribed => "unsubscribed",
            Self::MalformedContent => "malformed_content",
            Self::Render => "render",
            Self::UnsupportedChannel => "unsupported_channel",
        }
    }
}

impl std::fmt::Display for ChannelErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure payload reported by a channel adapter or the dispatcher.
///
/// `retryable` drives the retry coordinator: transient faults are retried
/// with backoff, permanent faults terminate the occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelError {
    pub code: ChannelErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl ChannelError {
    pub fn new(code: ChannelErrorCode, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            retryable,
        }
    }

    /// A retryable transient fault.
    pub fn transient(code: ChannelErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message, true)
    }

    /// A non-retryable permanent fault.
    pub fn permanent(code: ChannelErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message, false)
    }
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ChannelError {}
