//! Reminder occurrences and their delivery state machine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ChannelKind, TriggerPriority};
use crate::{Error, Result};

/// One concrete due-event instance: a trigger firing once on one channel.
///
/// A fire that targets several channels expands into one occurrence per
/// channel, so every delivery attempt belongs to exactly one occurrence and
/// one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderOccurrence {
    /// Unique occurrence id.
    pub id: String,
    /// Trigger that fired.
    pub trigger_id: String,
    /// Owning account.
    pub account_id: String,
    /// Template rendered for this occurrence.
    pub template_id: String,
    /// Reminder group of the trigger.
    pub group_id: String,
    /// Delivery channel.
    pub channel: ChannelKind,
    /// Delivery priority inherited from the trigger.
    pub priority: TriggerPriority,
    /// Variable values for template rendering.
    pub variables: HashMap<String, String>,
    /// When the trigger fired.
    pub fired_at: DateTime<Utc>,
    /// Current delivery state.
    #[serde(default)]
    pub state: OccurrenceState,
}

impl ReminderOccurrence {
    /// Create an occurrence for one (fire, channel) pair with a fresh id.
    pub fn new(
        trigger_id: impl Into<String>,
        account_id: impl Into<String>,
        template_id: impl Into<String>,
        group_id: impl Into<String>,
        channel: ChannelKind,
        priority: TriggerPriority,
        variables: HashMap<String, String>,
        fired_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            trigger_id: trigger_id.into(),
            account_id: account_id.into(),
            template_id: template_id.into(),
            group_id: group_id.into(),
            channel,
            priority,
            variables,
            fired_at,
            state: OccurrenceState::Scheduled,
        }
    }

    /// Move to `next`, rejecting transitions the state machine forbids.
    pub fn advance(&mut self, next: OccurrenceState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }
}

/// Delivery state of one occurrence.
///
/// `Succeeded` and `FailedTerminal` are the only terminal states; both are
/// always followed by exactly one statistics update before disposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceState {
    #[default]
    Scheduled,
    Gated,
    Rendering,
    RateCheck,
    Sending,
    RetryPending,
    Succeeded,
    FailedTerminal,
}

impl OccurrenceState {
    /// Whether no further processing happens in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedTerminal)
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: OccurrenceState) -> bool {
        use OccurrenceState::*;
        matches!(
            (self, next),
            (Scheduled, Gated)
                | (Gated, Rendering)
                // A deferred occurrence re-enters the gate at quiet end.
                | (Gated, Gated)
                | (Rendering, RateCheck)
                | (Rendering, FailedTerminal)
                | (RateCheck, Sending)
                | (RateCheck, RetryPending)
                | (Sending, Succeeded)
                | (Sending, RetryPending)
                | (Sending, FailedTerminal)
                | (RetryPending, RateCheck)
                | (RetryPending, FailedTerminal)
        )
    }
}

impl std::fmt::Display for OccurrenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Scheduled => "scheduled",
            Self::Gated => "gated",
            Self::Rendering => "rendering",
            Self::RateCheck => "rate_check",
            Self::Sending => "sending",
            Self::RetryPending => "retry_pending",
            Self::Succeeded => "succeeded",
            Self::FailedTerminal => "failed_terminal",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(OccurrenceState::Succeeded.is_terminal());
        assert!(OccurrenceState::FailedTerminal.is_terminal());
        assert!(!OccurrenceState::Sending.is_terminal());
        assert!(!OccurrenceState::RetryPending.is_terminal());
    }

    #[test]
    fn test_happy_path_transitions() {
        use OccurrenceState::*;
        let path = [Scheduled, Gated, Rendering, RateCheck, Sending, Succeeded];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_retry_loop_transitions() {
        use OccurrenceState::*;
        assert!(Sending.can_transition_to(RetryPending));
        assert!(RetryPending.can_transition_to(RateCheck));
        assert!(RateCheck.can_transition_to(RetryPending));
        assert!(RetryPending.can_transition_to(FailedTerminal));
    }

    #[test]
    fn test_no_exit_from_terminal_states() {
        use OccurrenceState::*;
        for next in [
            Scheduled,
            Gated,
            Rendering,
            RateCheck,
            Sending,
            RetryPending,
            Succeeded,
            FailedTerminal,
        ] {
            assert!(!Succeeded.can_transition_to(next));
            assert!(!FailedTerminal.can_transition_to(next));
        }
    }

    #[test]
    fn test_advance_walks_the_happy_path() {
        use OccurrenceState::*;
        let mut occ = ReminderOccurrence::new(
            "t-1",
            "acct-1",
            "tpl-1",
            "grp-1",
            ChannelKind::Email,
            TriggerPriority::Normal,
            HashMap::new(),
            Utc::now(),
        );
        assert_eq!(occ.state, Scheduled);
        for next in [Gated, Rendering, RateCheck, Sending, Succeeded] {
            occ.advance(next).unwrap();
            assert_eq!(occ.state, next);
        }
    }

    #[test]
    fn test_advance_rejects_illegal_transition() {
        use OccurrenceState::*;
        let mut occ = ReminderOccurrence::new(
            "t-1",
            "acct-1",
            "tpl-1",
            "grp-1",
            ChannelKind::Email,
            TriggerPriority::Normal,
            HashMap::new(),
            Utc::now(),
        );
        // A scheduled occurrence must pass the gate before rendering.
        let err = occ.advance(Sending).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        // A failed advance leaves the state untouched.
        assert_eq!(occ.state, Scheduled);
    }

    #[test]
    fn test_new_occurrence_gets_unique_id() {
        let a = ReminderOccurrence::new(
            "t-1",
            "acct-1",
            "tpl-1",
            "grp-1",
            ChannelKind::Email,
            TriggerPriority::Normal,
            HashMap::new(),
            Utc::now(),
        );
        let b = ReminderOccurrence::new(
            "t-1",
            "acct-1",
            "tpl-1",
            "grp-1",
            ChannelKind::Email,
            TriggerPriority::Normal,
            HashMap::new(),
            Utc::now(),
        );
        assert_ne!(a.id, b.id);
    }
}
