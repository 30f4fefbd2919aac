//! Per-account do-not-disturb configuration.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// An account's quiet-hour window.
///
/// The window is circular: `quiet_start` later than `quiet_end` means the
/// window wraps midnight (e.g. 22:00-07:00). A window with
/// `quiet_start == quiet_end` is empty and never suppresses anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoNotDisturbConfig {
    /// Owning account.
    pub account_id: String,
    /// Start of the quiet window (inclusive), account-local time of day.
    pub quiet_start: NaiveTime,
    /// End of the quiet window (exclusive), account-local time of day.
    pub quiet_end: NaiveTime,
    /// Whether urgent reminders may be delivered inside the window.
    pub allow_urgent_override: bool,
    /// IANA timezone the window is expressed in (UTC when absent).
    #[serde(default)]
    pub timezone: Option<String>,
}

impl DoNotDisturbConfig {
    /// Whether the quiet window is active at the given time of day.
    pub fn is_quiet(&self, time: NaiveTime) -> bool {
        if self.quiet_start == self.quiet_end {
            return false;
        }
        if self.quiet_start < self.quiet_end {
            time >= self.quiet_start && time < self.quiet_end
        } else {
            // Wraps midnight, e.g. 22:00-07:00.
            time >= self.quiet_start || time < self.quiet_end
        }
    }
}
