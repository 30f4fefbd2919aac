//! Per-(account, channel) send quotas.
//!
//! Sliding-window counters: at most `max_per_window` sends inside any
//! `window_secs` interval. The check-and-increment runs entirely under the
//! map entry's exclusive guard, so two concurrent dispatches can never both
//! consume the last slot.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::domain::{ChannelKind, RateLimitPolicy};

/// Outcome of a quota check. A denial is not a terminal failure: the
/// dispatcher retries at `retry_after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied { retry_after: DateTime<Utc> },
}

/// Sliding-window rate limiter keyed by (account, channel).
#[derive(Default)]
pub struct RateLimiter {
    windows: DashMap<(String, ChannelKind), VecDeque<DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically check the quota and, when capacity remains, record the
    /// send at `now`.
    ///
    /// On denial, `retry_after` is the earliest instant at which the oldest
    /// recorded send leaves the window and capacity frees up.
    pub fn try_acquire(
        &self,
        account_id: &str,
        channel: ChannelKind,
        policy: &RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let window = Duration::seconds(policy.window_secs as i64);

        if policy.max_per_window == 0 {
            return RateDecision::Denied {
                retry_after: now + window,
            };
        }

        let mut sends = self
            .windows
            .entry((account_id.to_string(), channel))
            .or_default();

        let cutoff = now - window;
        while sends.front().is_some_and(|t| *t <= cutoff) {
            sends.pop_front();
        }

        if (sends.len() as u32) < policy.max_per_window {
            sends.push_back(now);
            RateDecision::Allowed
        } else {
            let retry_after = match sends.front() {
                Some(oldest) => *oldest + window,
                None => now + window,
            };
            RateDecision::Denied { retry_after }
        }
    }
}
