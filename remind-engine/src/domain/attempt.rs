//! Append-only delivery attempt records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChannelError, ChannelKind, ChannelResponse};

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Delivered(ChannelResponse),
    Failed(ChannelError),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }

    /// The failure payload, when this attempt failed.
    pub fn error(&self) -> Option<&ChannelError> {
        match self {
            Self::Delivered(_) => None,
            Self::Failed(e) => Some(e),
        }
    }

    /// The success payload, when this attempt delivered.
    pub fn response(&self) -> Option<&ChannelResponse> {
        match self {
            Self::Delivered(r) => Some(r),
            Self::Failed(_) => None,
        }
    }
}

/// One send attempt for one occurrence on one channel.
///
/// Attempts form an append-only audit trail; `attempt_number` starts at 1
/// and is strictly increasing per occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// Occurrence this attempt belongs to.
    pub occurrence_id: String,
    /// Channel the attempt was made on.
    pub channel: ChannelKind,
    /// 1-based attempt number, bounded by the configured maximum.
    pub attempt_number: u32,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// How the attempt ended.
    pub outcome: AttemptOutcome,
    /// Earliest time of the next attempt, when one is scheduled.
    pub next_retry_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChannelErrorCode;

    #[test]
    fn test_outcome_accessors() {
        let ok = AttemptOutcome::Delivered(ChannelResponse {
            delivered_at: Utc::now(),
            provider_message_id: Some("msg-1".to_string()),
        });
        assert!(ok.is_success());
        assert!(ok.error().is_none());

        let failed = AttemptOutcome::Failed(ChannelError::transient(
            ChannelErrorCode::Transport,
            "connection reset",
        ));
        assert!(!failed.is_success());
        assert_eq!(
            failed.error().unwrap().code,
            ChannelErrorCode::Transport
        );
    }

    #[test]
    fn test_attempt_serde_round_trip() {
        let attempt = DeliveryAttempt {
            occurrence_id: "occ-1".to_string(),
            channel: ChannelKind::Push,
            attempt_number: 2,
            started_at: Utc::now(),
            outcome: AttemptOutcome::Failed(ChannelError::transient(
                ChannelErrorCode::Timeout,
                "send timed out",
            )),
            next_retry_at: Some(Utc::now()),
        };
        let json = serde_json::to_string(&attempt).unwrap();
        let back: DeliveryAttempt = serde_json::from_str(&json).unwrap();
        assert_eq!(back.attempt_number, 2);
        assert_eq!(back.channel, ChannelKind::Push);
        assert!(!back.outcome.is_success());
    }
}
