//! Engine orchestration.
//!
//! Wires the scheduler, gate, dispatcher, retry coordinator, and
//! statistics together. Each due event is processed as an independent unit
//! of work: the fire expands into one occurrence per enabled channel, each
//! occurrence is gated against quiet hours, dispatched, and retried on its
//! own task. Occurrences from the same trigger may be in flight
//! concurrently across fire times.

use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::channels::AdapterSet;
use crate::config::EngineConfig;
use crate::dispatch::ChannelDispatcher;
use crate::domain::{
    ChannelConfig, ChannelKind, DeliveryAttempt, DoNotDisturbConfig, OccurrenceState,
    RateLimitPolicy, ReminderOccurrence, ReminderTrigger,
};
use crate::events::EngineEvent;
use crate::gate::{self, GateDecision};
use crate::ratelimit::RateLimiter;
use crate::retry::{RetryCoordinator, RetryDecision};
use crate::schedule::{DueEvent, TriggerScheduler};
use crate::stats::{
    GroupStatsInfo, OutcomeClass, StatisticsAggregator, TemplateStatsInfo, TriggerStatsInfo,
    classify,
};
use crate::storage::DeliveryStore;
use crate::template::NotificationTemplate;

/// Per-account settings read at delivery time.
///
/// Settings are owned externally; the engine reads the current value on
/// every gate and rate check so user changes apply to the next occurrence
/// without a restart.
pub trait SettingsProvider: Send + Sync {
    fn dnd_config(&self, account_id: &str) -> Option<DoNotDisturbConfig>;
    fn channel_config(&self, account_id: &str, channel: ChannelKind) -> Option<ChannelConfig>;
}

/// In-memory settings, mutable at runtime. Suits tests and embedders that
/// push settings changes into the engine process.
#[derive(Default)]
pub struct StaticSettings {
    dnd: DashMap<String, DoNotDisturbConfig>,
    channels: DashMap<(String, ChannelKind), ChannelConfig>,
}

impl StaticSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_dnd(&self, config: DoNotDisturbConfig) {
        self.dnd.insert(config.account_id.clone(), config);
    }

    pub fn clear_dnd(&self, account_id: &str) {
        self.dnd.remove(account_id);
    }

    pub fn set_channel(&self, config: ChannelConfig) {
        self.channels
            .insert((config.account_id.clone(), config.channel), config);
    }
}

impl SettingsProvider for StaticSettings {
    fn dnd_config(&self, account_id: &str) -> Option<DoNotDisturbConfig> {
        self.dnd.get(account_id).map(|c| c.clone())
    }

    fn channel_config(&self, account_id: &str, channel: ChannelKind) -> Option<ChannelConfig> {
        self.channels
            .get(&(account_id.to_string(), channel))
            .map(|c| c.clone())
    }
}

struct EngineInner {
    scheduler: TriggerScheduler,
    dispatcher: ChannelDispatcher,
    retry: RetryCoordinator,
    stats: Arc<StatisticsAggregator>,
    settings: Arc<dyn SettingsProvider>,
    store: Arc<dyn DeliveryStore>,
    templates: DashMap<String, Arc<NotificationTemplate>>,
    event_tx: broadcast::Sender<EngineEvent>,
    cancel: CancellationToken,
}

/// The reminder delivery engine.
pub struct ReminderEngine {
    inner: Arc<EngineInner>,
    due_rx: Mutex<Option<mpsc::Receiver<DueEvent>>>,
}

impl ReminderEngine {
    pub fn new(
        config: EngineConfig,
        adapters: AdapterSet,
        settings: Arc<dyn SettingsProvider>,
        store: Arc<dyn DeliveryStore>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (scheduler, due_rx) =
            TriggerScheduler::new(config.tick(), config.due_queue_capacity, cancel.clone());
        let dispatcher = ChannelDispatcher::new(
            adapters,
            Arc::new(RateLimiter::new()),
            store.clone(),
            config.send_timeout(),
        );
        let (event_tx, _) = broadcast::channel(config.event_capacity);

        Self {
            inner: Arc::new(EngineInner {
                scheduler,
                dispatcher,
                retry: RetryCoordinator::new(config.retry.clone()),
                stats: Arc::new(StatisticsAggregator::with_store(store.clone())),
                settings,
                store,
                templates: DashMap::new(),
                event_tx,
                cancel,
            }),
            due_rx: Mutex::new(Some(due_rx)),
        }
    }

    /// Load persisted triggers and spawn the scheduler and delivery loops.
    pub async fn start(&self) -> Result<()> {
        let Some(mut due_rx) = self.due_rx.lock().take() else {
            return Err(crate::Error::config("engine already started"));
        };

        for trigger in self.inner.store.load_active_triggers().await? {
            let trigger_id = trigger.id.clone();
            if let Err(e) = self.inner.scheduler.insert(trigger) {
                warn!(trigger_id = %trigger_id, error = %e, "Skipping persisted trigger");
            }
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.scheduler.run().await;
        });

        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    due = due_rx.recv() => match due {
                        Some(due) => {
                            let inner = inner.clone();
                            tokio::spawn(async move {
                                process_due(inner, due).await;
                            });
                        }
                        None => break,
                    }
                }
            }
            info!("Delivery loop stopped");
        });

        info!(
            triggers = self.inner.scheduler.len(),
            "Reminder engine started"
        );
        Ok(())
    }

    /// Stop the scheduler and delivery loops. In-flight sends finish;
    /// pending retry waits are abandoned.
    pub fn shutdown(&self) {
        info!("Reminder engine shutting down");
        self.inner.cancel.cancel();
    }

    /// Register or replace a template.
    pub fn register_template(&self, template: NotificationTemplate) {
        self.inner
            .templates
            .insert(template.id.clone(), Arc::new(template));
    }

    pub fn remove_template(&self, template_id: &str) -> bool {
        self.inner.templates.remove(template_id).is_some()
    }

    /// Register a trigger; its expression and timezone are validated here,
    /// never at fire time.
    pub fn enqueue_trigger(&self, trigger: ReminderTrigger) -> Result<()> {
        self.inner.scheduler.insert(trigger)
    }

    /// Deactivate and remove a trigger. In-flight occurrences, including
    /// pending retries, still run to completion.
    pub fn cancel_trigger(&self, trigger_id: &str) -> Result<()> {
        if self.inner.scheduler.remove(trigger_id) {
            info!(trigger_id = %trigger_id, "Trigger cancelled");
            Ok(())
        } else {
            Err(crate::Error::not_found("trigger", trigger_id))
        }
    }

    /// Stop a trigger from firing without removing it.
    pub fn pause_trigger(&self, trigger_id: &str) -> Result<()> {
        if self.inner.scheduler.set_active(trigger_id, false) {
            Ok(())
        } else {
            Err(crate::Error::not_found("trigger", trigger_id))
        }
    }

    /// Resume a paused trigger; its next fire is recomputed from now.
    pub fn resume_trigger(&self, trigger_id: &str) -> Result<()> {
        if self.inner.scheduler.set_active(trigger_id, true) {
            Ok(())
        } else {
            Err(crate::Error::not_found("trigger", trigger_id))
        }
    }

    /// Subscribe to delivery events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn template_stats(&self, template_id: &str) -> Option<TemplateStatsInfo> {
        self.inner.stats.template_stats(template_id)
    }

    pub fn group_stats(&self, group_id: &str) -> Option<GroupStatsInfo> {
        self.inner.stats.group_stats(group_id)
    }

    pub fn trigger_stats(&self, trigger_id: &str) -> Option<TriggerStatsInfo> {
        self.inner.stats.trigger_stats(trigger_id)
    }

    pub fn reset_statistics(&self) {
        self.inner.stats.reset();
    }

    /// Audit trail of one occurrence.
    pub async fn attempts_for_occurrence(
        &self,
        occurrence_id: &str,
    ) -> Result<Vec<DeliveryAttempt>> {
        self.inner.store.attempts_for_occurrence(occurrence_id).await
    }
}

/// Expand one fire into per-channel occurrences and spawn their delivery.
async fn process_due(inner: Arc<EngineInner>, due: DueEvent) {
    debug!(
        trigger_id = %due.trigger_id,
        fired_at = %due.fired_at,
        channels = due.channels.len(),
        "Processing due event"
    );

    for channel in due.channels.iter().copied() {
        let channel_config = inner.settings.channel_config(&due.account_id, channel);
        if let Some(config) = &channel_config
            && !config.enabled
        {
            debug!(
                trigger_id = %due.trigger_id,
                channel = %channel,
                "Channel disabled for account, skipping"
            );
            continue;
        }
        let policy = channel_config
            .map(|c| c.rate_limit)
            .unwrap_or_else(RateLimitPolicy::default);

        let occurrence = ReminderOccurrence::new(
            due.trigger_id.clone(),
            due.account_id.clone(),
            due.template_id.clone(),
            due.group_id.clone(),
            channel,
            due.priority,
            due.variables.clone(),
            due.fired_at,
        );

        let inner = inner.clone();
        tokio::spawn(async move {
            gate_and_deliver(inner, occurrence, policy).await;
        });
    }
}

/// Advance an occurrence, abandoning it on an illegal transition.
///
/// The state table is the single source of truth for legal progress; a
/// rejected advance indicates a wiring bug, so the occurrence is dropped
/// rather than delivered out of order.
fn advance_or_abandon(occurrence: &mut ReminderOccurrence, next: OccurrenceState) -> bool {
    if let Err(e) = occurrence.advance(next) {
        error!(
            occurrence_id = %occurrence.id,
            error = %e,
            "Abandoning occurrence"
        );
        return false;
    }
    true
}

/// Timezone used to evaluate an account's quiet window.
fn account_timezone(config: Option<&DoNotDisturbConfig>) -> Tz {
    let Some(name) = config.and_then(|c| c.timezone.as_deref()) else {
        return chrono_tz::UTC;
    };
    match name.parse() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = %name, "Unknown timezone in quiet-hours config, falling back to UTC");
            chrono_tz::UTC
        }
    }
}

/// Gate one occurrence and, once allowed through, deliver it.
///
/// A deferred occurrence sleeps until the quiet window ends and then
/// re-enters the gate, since the configuration may have changed meanwhile.
async fn gate_and_deliver(
    inner: Arc<EngineInner>,
    mut occurrence: ReminderOccurrence,
    policy: RateLimitPolicy,
) {
    loop {
        if !advance_or_abandon(&mut occurrence, OccurrenceState::Gated) {
            return;
        }
        let dnd = inner.settings.dnd_config(&occurrence.account_id);
        let tz = account_timezone(dnd.as_ref());
        match gate::decide(dnd.as_ref(), tz, occurrence.priority, Utc::now()) {
            GateDecision::DeliverNow => break,
            GateDecision::DeliverNowOverride => {
                debug!(
                    occurrence_id = %occurrence.id,
                    "Urgent priority overrides quiet hours"
                );
                break;
            }
            GateDecision::DeferUntil(at) => {
                info!(
                    occurrence_id = %occurrence.id,
                    trigger_id = %occurrence.trigger_id,
                    deferred_until = %at,
                    "Quiet hours active, deferring delivery"
                );
                inner
                    .stats
                    .record(
                        &occurrence.template_id,
                        &occurrence.group_id,
                        &occurrence.trigger_id,
                        OutcomeClass::Suppressed,
                    )
                    .await;
                let _ = inner.event_tx.send(EngineEvent::Suppressed {
                    occurrence_id: occurrence.id.clone(),
                    trigger_id: occurrence.trigger_id.clone(),
                    template_id: occurrence.template_id.clone(),
                    group_id: occurrence.group_id.clone(),
                    channel: occurrence.channel,
                    deferred_until: at,
                    suppressed_at: Utc::now(),
                });
                if !sleep_until(&inner.cancel, at).await {
                    return;
                }
            }
        }
    }

    deliver(inner, occurrence, policy).await;
}

/// Run the dispatch/retry loop for one occurrence until terminal.
async fn deliver(
    inner: Arc<EngineInner>,
    mut occurrence: ReminderOccurrence,
    policy: RateLimitPolicy,
) {
    let Some(template) = inner
        .templates
        .get(&occurrence.template_id)
        .map(|t| t.clone())
    else {
        error!(
            occurrence_id = %occurrence.id,
            template_id = %occurrence.template_id,
            "No template registered, occurrence fails terminally"
        );
        // A missing template surfaces where rendering would, so the
        // occurrence fails through the rendering state.
        if !advance_or_abandon(&mut occurrence, OccurrenceState::Rendering)
            || !advance_or_abandon(&mut occurrence, OccurrenceState::FailedTerminal)
        {
            return;
        }
        inner
            .stats
            .record(
                &occurrence.template_id,
                &occurrence.group_id,
                &occurrence.trigger_id,
                OutcomeClass::FailedTerminal,
            )
            .await;
        let _ = inner.event_tx.send(EngineEvent::Failed {
            occurrence_id: occurrence.id.clone(),
            trigger_id: occurrence.trigger_id.clone(),
            template_id: occurrence.template_id.clone(),
            group_id: occurrence.group_id.clone(),
            channel: occurrence.channel,
            attempts: 0,
            reason: format!("template {} not registered", occurrence.template_id),
            failed_at: Utc::now(),
        });
        return;
    };

    let mut attempt_number = 1u32;
    loop {
        let attempt = match inner
            .dispatcher
            .dispatch(&mut occurrence, &template, &policy, attempt_number)
            .await
        {
            Ok(attempt) => attempt,
            Err(e) => {
                error!(
                    occurrence_id = %occurrence.id,
                    error = %e,
                    "Failed to record delivery attempt, abandoning occurrence"
                );
                inner.retry.finish(&occurrence.id);
                return;
            }
        };

        let decision = inner.retry.evaluate(&attempt, Utc::now());
        let retry_scheduled = matches!(decision, RetryDecision::RetryAt(_));
        let class = classify(&attempt.outcome, retry_scheduled);
        inner
            .stats
            .record(
                &occurrence.template_id,
                &occurrence.group_id,
                &occurrence.trigger_id,
                class,
            )
            .await;

        match (attempt.outcome.is_success(), decision) {
            (true, _) => {
                advance_or_abandon(&mut occurrence, OccurrenceState::Succeeded);
                info!(
                    occurrence_id = %occurrence.id,
                    trigger_id = %occurrence.trigger_id,
                    channel = %occurrence.channel,
                    attempts = attempt_number,
                    "Reminder delivered"
                );
                let _ = inner.event_tx.send(EngineEvent::Delivered {
                    occurrence_id: occurrence.id.clone(),
                    trigger_id: occurrence.trigger_id.clone(),
                    template_id: occurrence.template_id.clone(),
                    group_id: occurrence.group_id.clone(),
                    channel: occurrence.channel,
                    attempts: attempt_number,
                    delivered_at: attempt
                        .outcome
                        .response()
                        .map(|r| r.delivered_at)
                        .unwrap_or_else(Utc::now),
                });
                inner.retry.finish(&occurrence.id);
                return;
            }
            (false, RetryDecision::GiveUp) => {
                // A render failure already went terminal inside dispatch.
                if !occurrence.state.is_terminal() {
                    advance_or_abandon(&mut occurrence, OccurrenceState::FailedTerminal);
                }
                let reason = attempt
                    .outcome
                    .error()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string());
                warn!(
                    occurrence_id = %occurrence.id,
                    trigger_id = %occurrence.trigger_id,
                    channel = %occurrence.channel,
                    attempts = attempt_number,
                    reason = %reason,
                    "Reminder failed to deliver"
                );
                let _ = inner.event_tx.send(EngineEvent::Failed {
                    occurrence_id: occurrence.id.clone(),
                    trigger_id: occurrence.trigger_id.clone(),
                    template_id: occurrence.template_id.clone(),
                    group_id: occurrence.group_id.clone(),
                    channel: occurrence.channel,
                    attempts: attempt_number,
                    reason,
                    failed_at: Utc::now(),
                });
                inner.retry.finish(&occurrence.id);
                return;
            }
            (false, RetryDecision::RetryAt(at)) => {
                // A rate denial already moved to retry-pending inside
                // dispatch; a failed send moves there here.
                if occurrence.state != OccurrenceState::RetryPending
                    && !advance_or_abandon(&mut occurrence, OccurrenceState::RetryPending)
                {
                    return;
                }
                if !inner.retry.begin(&occurrence.id, at) {
                    warn!(
                        occurrence_id = %occurrence.id,
                        "Retry already pending for occurrence, dropping duplicate"
                    );
                    return;
                }
                let resumed = sleep_until(&inner.cancel, at).await;
                inner.retry.finish(&occurrence.id);
                if !resumed {
                    return;
                }
                attempt_number += 1;
            }
        }
    }
}

/// Sleep until `at` or until shutdown. Returns false when cancelled.
async fn sleep_until(cancel: &CancellationToken, at: chrono::DateTime<Utc>) -> bool {
    let delay = (at - Utc::now())
        .to_std()
        .unwrap_or(std::time::Duration::ZERO);
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
