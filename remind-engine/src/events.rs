//! Engine delivery events.
//!
//! Emitted on the engine's broadcast channel once per terminal occurrence
//! outcome (and once per quiet-hours deferral). Consumers that lag simply
//! miss events; delivery itself never blocks on a slow subscriber.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::ChannelKind;

/// A terminal delivery outcome or a quiet-hours deferral.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A channel accepted the notification.
    Delivered {
        occurrence_id: String,
        trigger_id: String,
        template_id: String,
        group_id: String,
        channel: ChannelKind,
        /// Attempts used, including the successful one.
        attempts: u32,
        delivered_at: DateTime<Utc>,
    },
    /// All attempts are exhausted or the failure was permanent.
    Failed {
        occurrence_id: String,
        trigger_id: String,
        template_id: String,
        group_id: String,
        channel: ChannelKind,
        attempts: u32,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    /// Quiet hours deferred the occurrence; it re-enters the gate at
    /// `deferred_until`.
    Suppressed {
        occurrence_id: String,
        trigger_id: String,
        template_id: String,
        group_id: String,
        channel: ChannelKind,
        deferred_until: DateTime<Utc>,
        suppressed_at: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::Failed { .. } => "failed",
            Self::Suppressed { .. } => "suppressed",
        }
    }

    pub fn occurrence_id(&self) -> &str {
        match self {
            Self::Delivered { occurrence_id, .. }
            | Self::Failed { occurrence_id, .. }
            | Self::Suppressed { occurrence_id, .. } => occurrence_id,
        }
    }
}
