//! Single-attempt dispatch pipeline: render, rate check, bounded send.
//!
//! One `dispatch` call produces exactly one [`DeliveryAttempt`], appended
//! to the store before the call returns. Failure classification happens
//! here: render errors and unknown channels are permanent, rate denials
//! and send timeouts are retryable, and adapter errors carry their own
//! classification.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::Result;
use crate::channels::AdapterSet;
use crate::domain::{
    AttemptOutcome, ChannelError, ChannelErrorCode, DeliveryAttempt, OccurrenceState,
    RateLimitPolicy, ReminderOccurrence,
};
use crate::ratelimit::{RateDecision, RateLimiter};
use crate::storage::DeliveryStore;
use crate::template::{self, NotificationTemplate};

/// Executes one delivery attempt per call.
pub struct ChannelDispatcher {
    adapters: AdapterSet,
    limiter: Arc<RateLimiter>,
    store: Arc<dyn DeliveryStore>,
    send_timeout: Duration,
}

impl ChannelDispatcher {
    pub fn new(
        adapters: AdapterSet,
        limiter: Arc<RateLimiter>,
        store: Arc<dyn DeliveryStore>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            adapters,
            limiter,
            store,
            send_timeout,
        }
    }

    /// Run one attempt for `occurrence` and record it.
    ///
    /// `attempt_number` is 1-based and supplied by the caller, which owns
    /// the retry loop. The occurrence enters gated (first attempt) or
    /// retry-pending (subsequent attempts) and its state is advanced
    /// through the pipeline here; the caller applies the terminal or
    /// retry-pending transition once the retry decision is known. The
    /// returned attempt's `next_retry_at` is set only for rate denials,
    /// carrying the limiter's earliest-free-slot hint.
    pub async fn dispatch(
        &self,
        occurrence: &mut ReminderOccurrence,
        template: &NotificationTemplate,
        policy: &RateLimitPolicy,
        attempt_number: u32,
    ) -> Result<DeliveryAttempt> {
        let started_at = Utc::now();

        // A retry re-enters at the rate check; only the first attempt
        // passes through the rendering state.
        if occurrence.state != OccurrenceState::RetryPending {
            occurrence.advance(OccurrenceState::Rendering)?;
        }
        let content = match template::render(template, occurrence.channel, &occurrence.variables) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    occurrence_id = %occurrence.id,
                    template_id = %occurrence.template_id,
                    error = %e,
                    "Render failed, occurrence will not be retried"
                );
                occurrence.advance(OccurrenceState::FailedTerminal)?;
                let outcome = AttemptOutcome::Failed(ChannelError::permanent(
                    ChannelErrorCode::Render,
                    e.to_string(),
                ));
                return self
                    .record(occurrence, attempt_number, started_at, outcome, None)
                    .await;
            }
        };

        occurrence.advance(OccurrenceState::RateCheck)?;
        if let RateDecision::Denied { retry_after } = self.limiter.try_acquire(
            &occurrence.account_id,
            occurrence.channel,
            policy,
            started_at,
        ) {
            debug!(
                occurrence_id = %occurrence.id,
                account_id = %occurrence.account_id,
                channel = %occurrence.channel,
                retry_after = %retry_after,
                "Rate limit exceeded"
            );
            occurrence.advance(OccurrenceState::RetryPending)?;
            let outcome = AttemptOutcome::Failed(ChannelError::transient(
                ChannelErrorCode::RateLimited,
                format!(
                    "quota exhausted for account {} on {}",
                    occurrence.account_id, occurrence.channel
                ),
            ));
            return self
                .record(occurrence, attempt_number, started_at, outcome, Some(retry_after))
                .await;
        }

        occurrence.advance(OccurrenceState::Sending)?;
        let Some(adapter) = self.adapters.get(occurrence.channel) else {
            warn!(channel = %occurrence.channel, "No adapter registered for channel");
            let outcome = AttemptOutcome::Failed(ChannelError::permanent(
                ChannelErrorCode::UnsupportedChannel,
                format!("no adapter registered for {}", occurrence.channel),
            ));
            return self
                .record(occurrence, attempt_number, started_at, outcome, None)
                .await;
        };

        let outcome = match tokio::time::timeout(self.send_timeout, adapter.send(&content)).await {
            Ok(Ok(response)) => AttemptOutcome::Delivered(response),
            Ok(Err(error)) => AttemptOutcome::Failed(error),
            Err(_) => AttemptOutcome::Failed(ChannelError::transient(
                ChannelErrorCode::Timeout,
                format!("send exceeded {}ms", self.send_timeout.as_millis()),
            )),
        };

        self.record(occurrence, attempt_number, started_at, outcome, None)
            .await
    }

    async fn record(
        &self,
        occurrence: &ReminderOccurrence,
        attempt_number: u32,
        started_at: chrono::DateTime<Utc>,
        outcome: AttemptOutcome,
        next_retry_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<DeliveryAttempt> {
        let attempt = DeliveryAttempt {
            occurrence_id: occurrence.id.clone(),
            channel: occurrence.channel,
            attempt_number,
            started_at,
            outcome,
            next_retry_at,
        };
        self.store.append_attempt(&attempt).await?;

        match &attempt.outcome {
            AttemptOutcome::Delivered(_) => debug!(
                occurrence_id = %occurrence.id,
                channel = %occurrence.channel,
                attempt = attempt_number,
                "Delivery attempt succeeded"
            ),
            AttemptOutcome::Failed(e) => debug!(
                occurrence_id = %occurrence.id,
                channel = %occurrence.channel,
                attempt = attempt_number,
                error = %e,
                retryable = e.retryable,
                "Delivery attempt failed"
            ),
        }
        Ok(attempt)
    }
}
