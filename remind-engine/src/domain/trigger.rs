//! Reminder triggers and their schedules.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ChannelKind;

/// Delivery priority of a trigger's occurrences.
///
/// Urgent reminders may override an account's quiet hours when the account
/// allows it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPriority {
    #[default]
    Normal,
    Urgent,
}

impl std::fmt::Display for TriggerPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::Urgent => f.write_str("urgent"),
        }
    }
}

/// A user-scheduled reminder.
///
/// The schedule expression uses six cron fields (second, minute, hour,
/// day-of-month, month, day-of-week). `next_fire_at` is owned exclusively
/// by the trigger scheduler and recomputed from the expression on every
/// fire, never by elapsed-duration arithmetic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderTrigger {
    /// Unique trigger id.
    pub id: String,
    /// Owning account.
    pub account_id: String,
    /// Six-field cron expression.
    pub schedule: String,
    /// Optional IANA timezone the expression is evaluated in (UTC when absent).
    #[serde(default)]
    pub timezone: Option<String>,
    /// Template rendered on each fire.
    pub template_id: String,
    /// Reminder group this trigger belongs to.
    pub group_id: String,
    /// Channels each fire is delivered on.
    pub channels: Vec<ChannelKind>,
    /// Delivery priority.
    #[serde(default)]
    pub priority: TriggerPriority,
    /// Variable values substituted into the template at render time.
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// Next time this trigger is due.
    pub next_fire_at: DateTime<Utc>,
    /// Inactive triggers are skipped by the scheduler.
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(TriggerPriority::Urgent > TriggerPriority::Normal);
        assert_eq!(TriggerPriority::default(), TriggerPriority::Normal);
    }

    #[test]
    fn test_trigger_serde_defaults() {
        let json = r#"{
            "id": "t-1",
            "account_id": "acct-1",
            "schedule": "0 * * * * *",
            "template_id": "tpl-1",
            "group_id": "grp-1",
            "channels": ["email"],
            "next_fire_at": "2026-01-01T00:00:00Z",
            "active": true
        }"#;
        let trigger: ReminderTrigger = serde_json::from_str(json).unwrap();
        assert_eq!(trigger.priority, TriggerPriority::Normal);
        assert!(trigger.timezone.is_none());
        assert!(trigger.variables.is_empty());
    }
}
