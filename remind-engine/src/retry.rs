//! Retry scheduling with exponential backoff and jitter.
//!
//! A failed attempt is retried only when its error is retryable and the
//! attempt count is below the policy ceiling. The delay doubles per
//! attempt, capped at the policy maximum, with a uniform ±20% jitter so
//! that a burst of failures does not retry in lockstep. A rate-limit
//! `retry_after` hint takes precedence over the backoff delay when it is
//! later.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::DeliveryAttempt;

/// Backoff policy for failed delivery attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delivery attempts per occurrence, including the first.
    pub max_attempts: u32,
    /// Backoff base for the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Backoff ceiling, in milliseconds (before jitter).
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 300_000,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Attempt again no earlier than this instant.
    RetryAt(DateTime<Utc>),
    /// The occurrence is terminally failed.
    GiveUp,
}

/// Decides whether and when a failed occurrence is retried.
///
/// Also tracks occurrences with a retry in flight so the same occurrence
/// is never scheduled twice concurrently.
pub struct RetryCoordinator {
    policy: RetryPolicy,
    pending: DashMap<String, DateTime<Utc>>,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            pending: DashMap::new(),
        }
    }

    /// Backoff delay for the retry following attempt `attempt_number`
    /// (1-based), jittered.
    pub fn backoff_delay(&self, attempt_number: u32) -> ChronoDuration {
        let exp = attempt_number.saturating_sub(1).min(32);
        let base = self
            .policy
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.policy.max_delay_ms);
        // Uniform jitter in [-20%, +20%] of the capped delay.
        let spread = (base / 5) as i64;
        let jitter = if spread > 0 {
            rand::rng().random_range(-spread..=spread)
        } else {
            0
        };
        ChronoDuration::milliseconds((base as i64 + jitter).max(0))
    }

    /// Evaluate one failed attempt against the policy.
    ///
    /// Successful attempts and non-retryable errors yield
    /// [`RetryDecision::GiveUp`], as does exhausting `max_attempts`. When a
    /// retry is due, the instant is the backoff delay from `now`, pushed
    /// out to the attempt's `next_retry_at` hint if the hint is later.
    pub fn evaluate(&self, attempt: &DeliveryAttempt, now: DateTime<Utc>) -> RetryDecision {
        let Some(error) = attempt.outcome.error() else {
            return RetryDecision::GiveUp;
        };
        if !error.retryable || attempt.attempt_number >= self.policy.max_attempts {
            return RetryDecision::GiveUp;
        }

        let backoff_at = now + self.backoff_delay(attempt.attempt_number);
        let retry_at = match attempt.next_retry_at {
            Some(hint) if hint > backoff_at => hint,
            _ => backoff_at,
        };
        debug!(
            occurrence_id = %attempt.occurrence_id,
            attempt = attempt.attempt_number,
            retry_at = %retry_at,
            "Scheduling retry"
        );
        RetryDecision::RetryAt(retry_at)
    }

    /// Mark an occurrence as having a retry in flight. Returns false when
    /// one is already pending.
    pub fn begin(&self, occurrence_id: &str, retry_at: DateTime<Utc>) -> bool {
        self.pending
            .insert(occurrence_id.to_string(), retry_at)
            .is_none()
    }

    /// Clear the in-flight marker once the retry ran or the occurrence
    /// reached a terminal state.
    pub fn finish(&self, occurrence_id: &str) {
        self.pending.remove(occurrence_id);
    }

    pub fn has_pending(&self, occurrence_id: &str) -> bool {
        self.pending.contains_key(occurrence_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AttemptOutcome, ChannelError, ChannelErrorCode, ChannelKind, ChannelResponse,
    };

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 16_000,
        }
    }

    fn failed_attempt(n: u32, retryable: bool, next_retry_at: Option<DateTime<Utc>>) -> DeliveryAttempt {
        let error = if retryable {
            ChannelError::transient(ChannelErrorCode::Transport, "connection reset")
        } else {
            ChannelError::permanent(ChannelErrorCode::InvalidRecipient, "address rejected")
        };
        DeliveryAttempt {
            occurrence_id: "occ-1".to_string(),
            channel: ChannelKind::Email,
            attempt_number: n,
            started_at: Utc::now(),
            outcome: AttemptOutcome::Failed(error),
            next_retry_at,
        }
    }

    #[test]
    fn test_backoff_doubles_within_jitter_bounds() {
        let coordinator = RetryCoordinator::new(policy());
        for _ in 0..100 {
            let d1 = coordinator.backoff_delay(1).num_milliseconds();
            assert!((800..=1_200).contains(&d1), "attempt 1 delay {d1}");

            let d3 = coordinator.backoff_delay(3).num_milliseconds();
            assert!((3_200..=4_800).contains(&d3), "attempt 3 delay {d3}");
        }
    }

    #[test]
    fn test_backoff_caps_at_max_delay() {
        let coordinator = RetryCoordinator::new(policy());
        for _ in 0..100 {
            // 2^9 * 1s would be 512s; the cap holds it at 16s ±20%.
            let d = coordinator.backoff_delay(10).num_milliseconds();
            assert!((12_800..=19_200).contains(&d), "capped delay {d}");
        }
    }

    #[test]
    fn test_retryable_error_schedules_retry() {
        let coordinator = RetryCoordinator::new(policy());
        let now = Utc::now();
        match coordinator.evaluate(&failed_attempt(1, true, None), now) {
            RetryDecision::RetryAt(at) => {
                let delay = (at - now).num_milliseconds();
                assert!((800..=1_200).contains(&delay));
            }
            RetryDecision::GiveUp => panic!("expected retry"),
        }
    }

    #[test]
    fn test_non_retryable_error_gives_up() {
        let coordinator = RetryCoordinator::new(policy());
        assert_eq!(
            coordinator.evaluate(&failed_attempt(1, false, None), Utc::now()),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_max_attempts_exhausted_gives_up() {
        let coordinator = RetryCoordinator::new(policy());
        assert_eq!(
            coordinator.evaluate(&failed_attempt(5, true, None), Utc::now()),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_success_gives_up() {
        let coordinator = RetryCoordinator::new(policy());
        let attempt = DeliveryAttempt {
            occurrence_id: "occ-1".to_string(),
            channel: ChannelKind::Email,
            attempt_number: 1,
            started_at: Utc::now(),
            outcome: AttemptOutcome::Delivered(ChannelResponse {
                delivered_at: Utc::now(),
                provider_message_id: None,
            }),
            next_retry_at: None,
        };
        assert_eq!(coordinator.evaluate(&attempt, Utc::now()), RetryDecision::GiveUp);
    }

    #[test]
    fn test_later_rate_limit_hint_wins_over_backoff() {
        let coordinator = RetryCoordinator::new(policy());
        let now = Utc::now();
        let hint = now + ChronoDuration::seconds(60);
        match coordinator.evaluate(&failed_attempt(1, true, Some(hint)), now) {
            RetryDecision::RetryAt(at) => assert_eq!(at, hint),
            RetryDecision::GiveUp => panic!("expected retry"),
        }
    }

    #[test]
    fn test_earlier_rate_limit_hint_defers_to_backoff() {
        let coordinator = RetryCoordinator::new(policy());
        let now = Utc::now();
        // Hint already in the past; backoff applies instead.
        let hint = now - ChronoDuration::seconds(5);
        match coordinator.evaluate(&failed_attempt(1, true, Some(hint)), now) {
            RetryDecision::RetryAt(at) => assert!(at > now),
            RetryDecision::GiveUp => panic!("expected retry"),
        }
    }

    #[test]
    fn test_single_pending_retry_per_occurrence() {
        let coordinator = RetryCoordinator::new(policy());
        let at = Utc::now();
        assert!(coordinator.begin("occ-1", at));
        assert!(!coordinator.begin("occ-1", at));
        assert!(coordinator.has_pending("occ-1"));
        coordinator.finish("occ-1");
        assert!(!coordinator.has_pending("occ-1"));
        assert!(coordinator.begin("occ-1", at));
    }
}
