//! Core domain model for the delivery engine.
//!
//! Everything the component chain passes around lives here: triggers and
//! their priorities, channel kinds and per-account channel configuration,
//! do-not-disturb windows, reminder occurrences with their state machine,
//! and the append-only delivery attempt records.

mod attempt;
mod channel;
mod dnd;
mod occurrence;
mod trigger;

pub use attempt::{AttemptOutcome, DeliveryAttempt};
pub use channel::{
    ChannelConfig, ChannelError, ChannelErrorCode, ChannelKind, ChannelResponse, RateLimitPolicy,
};
pub use dnd::DoNotDisturbConfig;
pub use occurrence::{OccurrenceState, ReminderOccurrence};
pub use trigger::{ReminderTrigger, TriggerPriority};
