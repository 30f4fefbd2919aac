//! Tick-driven trigger scheduler.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::domain::{ChannelKind, ReminderTrigger, TriggerPriority};

use super::eval::{next_occurrence, parse_expression, parse_timezone};

/// Snapshot of a trigger at fire time, emitted once per due trigger per tick.
#[derive(Debug, Clone)]
pub struct DueEvent {
    pub trigger_id: String,
    pub account_id: String,
    pub template_id: String,
    pub group_id: String,
    pub channels: Vec<ChannelKind>,
    pub priority: TriggerPriority,
    pub variables: HashMap<String, String>,
    pub fired_at: DateTime<Utc>,
}

struct TriggerEntry {
    trigger: ReminderTrigger,
    schedule: Schedule,
    tz: Tz,
}

/// Maintains the set of active triggers and emits due events.
///
/// The scheduler is the sole writer of `next_fire_at`. On every fire the
/// next time is recomputed strictly from the wall clock via the schedule
/// expression, so clock shifts (e.g. DST) can neither drift the schedule
/// nor double-fire a trigger.
pub struct TriggerScheduler {
    triggers: DashMap<String, TriggerEntry>,
    due_tx: mpsc::Sender<DueEvent>,
    tick: Duration,
    cancel: CancellationToken,
}

impl TriggerScheduler {
    /// Create a scheduler and the receiving end of its due-event queue.
    pub fn new(
        tick: Duration,
        queue_capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<DueEvent>) {
        let (due_tx, due_rx) = mpsc::channel(queue_capacity);
        let scheduler = Self {
            triggers: DashMap::new(),
            due_tx,
            tick,
            cancel,
        };
        (scheduler, due_rx)
    }

    /// Register a trigger, validating its expression and timezone.
    ///
    /// `next_fire_at` is recomputed from now; changes take effect on the
    /// next tick.
    pub fn insert(&self, mut trigger: ReminderTrigger) -> Result<()> {
        let schedule = parse_expression(&trigger.schedule)?;
        let tz = parse_timezone(trigger.timezone.as_deref())?;

        let now = Utc::now();
        match next_occurrence(&schedule, tz, now) {
            Some(next) => trigger.next_fire_at = next,
            None => {
                return Err(crate::Error::InvalidSchedule(format!(
                    "expression {:?} has no future occurrence",
                    trigger.schedule
                )));
            }
        }

        debug!(
            trigger_id = %trigger.id,
            next_fire_at = %trigger.next_fire_at,
            "Trigger registered"
        );
        self.triggers.insert(
            trigger.id.clone(),
            TriggerEntry {
                trigger,
                schedule,
                tz,
            },
        );
        Ok(())
    }

    /// Remove a trigger. In-flight occurrences are unaffected.
    pub fn remove(&self, trigger_id: &str) -> bool {
        self.triggers.remove(trigger_id).is_some()
    }

    /// Pause a trigger; it stays registered but stops firing.
    pub fn set_active(&self, trigger_id: &str, active: bool) -> bool {
        match self.triggers.get_mut(trigger_id) {
            Some(mut entry) => {
                entry.trigger.active = active;
                // A resumed trigger must not fire for ticks it slept through.
                if active {
                    let now = Utc::now();
                    if let Some(next) = next_occurrence(&entry.schedule, entry.tz, now) {
                        entry.trigger.next_fire_at = next;
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Whether a trigger is currently registered.
    pub fn contains(&self, trigger_id: &str) -> bool {
        self.triggers.contains_key(trigger_id)
    }

    /// Number of registered triggers.
    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Drive the timer loop until cancelled.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(tick = ?self.tick, "Trigger scheduler started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Trigger scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick_once(Utc::now());
                }
            }
        }
    }

    /// Evaluate one tick: emit an event for every due trigger and advance
    /// `next_fire_at`.
    ///
    /// Due triggers are emitted in ascending trigger-id order. Emission is
    /// non-blocking: when the due queue is full the trigger keeps its
    /// `next_fire_at` and is retried on the next tick.
    pub(crate) fn tick_once(&self, now: DateTime<Utc>) {
        let mut due: Vec<String> = self
            .triggers
            .iter()
            .filter(|e| e.trigger.active && e.trigger.next_fire_at <= now)
            .map(|e| e.key().clone())
            .collect();
        due.sort();

        for trigger_id in due {
            let Some(mut entry) = self.triggers.get_mut(&trigger_id) else {
                continue;
            };
            // Re-check under the entry guard; the trigger may have been
            // paused or already advanced since the scan.
            if !entry.trigger.active || entry.trigger.next_fire_at > now {
                continue;
            }

            let event = DueEvent {
                trigger_id: entry.trigger.id.clone(),
                account_id: entry.trigger.account_id.clone(),
                template_id: entry.trigger.template_id.clone(),
                group_id: entry.trigger.group_id.clone(),
                channels: entry.trigger.channels.clone(),
                priority: entry.trigger.priority,
                variables: entry.trigger.variables.clone(),
                fired_at: now,
            };

            match self.due_tx.try_send(event) {
                Ok(()) => match next_occurrence(&entry.schedule, entry.tz, now) {
                    Some(next) => {
                        debug!(trigger_id = %trigger_id, next_fire_at = %next, "Trigger fired");
                        entry.trigger.next_fire_at = next;
                    }
                    None => {
                        info!(trigger_id = %trigger_id, "Schedule exhausted, deactivating trigger");
                        entry.trigger.active = false;
                    }
                },
                Err(TrySendError::Full(_)) => {
                    // Backpressure: keep next_fire_at so the fire is retried
                    // next tick instead of being dropped.
                    warn!(trigger_id = %trigger_id, "Due-event queue full, deferring fire to next tick");
                    return;
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("Due-event queue closed, stopping tick evaluation");
                    return;
                }
            }
        }
    }
}
