//! Delivery statistics aggregation.
//!
//! Three monotone projections over dispatch outcomes:
//! - per template: sent / failed counts and the last successful send time
//! - per reminder group: sent / failed counts
//! - per trigger: fired (delivered) and suppressed counts
//!
//! Every dispatch produces exactly one [`OutcomeClass`] and one `record`
//! call. Attempts that will be retried are recorded with
//! [`OutcomeClass::Retrying`], which increments nothing; only terminal
//! outcomes move the counters, so a retried-then-delivered occurrence
//! counts once as sent and never as failed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

use crate::domain::AttemptOutcome;
use crate::storage::{DeliveryStore, StatsDelta, StatsView};

/// Classification of one dispatch outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeClass {
    /// The channel accepted the notification.
    Delivered,
    /// The attempt failed but a retry is scheduled. Not terminal; no
    /// counters move.
    Retrying,
    /// The attempt failed and no retry will follow.
    FailedTerminal,
    /// The occurrence was deferred by quiet hours instead of dispatched.
    Suppressed,
}

/// Map an attempt outcome to its class. `retry_scheduled` is whether the
/// retry coordinator decided to attempt again.
pub fn classify(outcome: &AttemptOutcome, retry_scheduled: bool) -> OutcomeClass {
    match outcome {
        AttemptOutcome::Delivered(_) => OutcomeClass::Delivered,
        AttemptOutcome::Failed(_) if retry_scheduled => OutcomeClass::Retrying,
        AttemptOutcome::Failed(_) => OutcomeClass::FailedTerminal,
    }
}

#[derive(Default)]
struct TemplateCounters {
    sent: AtomicU64,
    failed: AtomicU64,
    last_sent_at: RwLock<Option<DateTime<Utc>>>,
}

#[derive(Default)]
struct GroupCounters {
    sent: AtomicU64,
    failed: AtomicU64,
}

#[derive(Default)]
struct TriggerCounters {
    fired: AtomicU64,
    suppressed: AtomicU64,
}

/// Per-template statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateStatsInfo {
    pub template_id: String,
    pub sent_count: u64,
    pub failed_count: u64,
    pub last_sent_at: Option<DateTime<Utc>>,
}

/// Per-group statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct GroupStatsInfo {
    pub group_id: String,
    pub sent_count: u64,
    pub failed_count: u64,
}

/// Per-trigger statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerStatsInfo {
    pub trigger_id: String,
    pub fired_count: u64,
    pub suppressed_count: u64,
}

/// Aggregates dispatch outcomes into the three counter views.
///
/// Counters are all-time for the process; [`reset`](Self::reset) zeroes
/// them explicitly. When a store is attached, each terminal outcome is
/// also persisted as a delta, best effort.
pub struct StatisticsAggregator {
    per_template: DashMap<String, TemplateCounters>,
    per_group: DashMap<String, GroupCounters>,
    per_trigger: DashMap<String, TriggerCounters>,
    store: Option<Arc<dyn DeliveryStore>>,
}

impl StatisticsAggregator {
    pub fn new() -> Self {
        Self {
            per_template: DashMap::new(),
            per_group: DashMap::new(),
            per_trigger: DashMap::new(),
            store: None,
        }
    }

    /// Persist counter deltas through the given store.
    pub fn with_store(store: Arc<dyn DeliveryStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new()
        }
    }

    /// Record one classified dispatch outcome.
    pub async fn record(
        &self,
        template_id: &str,
        group_id: &str,
        trigger_id: &str,
        class: OutcomeClass,
    ) {
        let now = Utc::now();
        let delta = match class {
            OutcomeClass::Delivered => {
                {
                    let entry = self.per_template.entry(template_id.to_string()).or_default();
                    entry.sent.fetch_add(1, Ordering::Relaxed);
                    *entry.last_sent_at.write() = Some(now);
                }
                self.per_group
                    .entry(group_id.to_string())
                    .or_default()
                    .sent
                    .fetch_add(1, Ordering::Relaxed);
                self.per_trigger
                    .entry(trigger_id.to_string())
                    .or_default()
                    .fired
                    .fetch_add(1, Ordering::Relaxed);
                Some(StatsDelta {
                    success: 1,
                    failure: 0,
                    last_sent_at: Some(now),
                })
            }
            OutcomeClass::FailedTerminal | OutcomeClass::Suppressed => {
                self.per_template
                    .entry(template_id.to_string())
                    .or_default()
                    .failed
                    .fetch_add(1, Ordering::Relaxed);
                self.per_group
                    .entry(group_id.to_string())
                    .or_default()
                    .failed
                    .fetch_add(1, Ordering::Relaxed);
                self.per_trigger
                    .entry(trigger_id.to_string())
                    .or_default()
                    .suppressed
                    .fetch_add(1, Ordering::Relaxed);
                Some(StatsDelta {
                    success: 0,
                    failure: 1,
                    last_sent_at: None,
                })
            }
            OutcomeClass::Retrying => None,
        };

        if let (Some(store), Some(delta)) = (&self.store, delta) {
            for view in [
                StatsView::Template(template_id.to_string()),
                StatsView::Group(group_id.to_string()),
                StatsView::Trigger(trigger_id.to_string()),
            ] {
                if let Err(e) = store.upsert_stats(view, delta).await {
                    warn!(template_id = %template_id, error = %e, "Failed to persist statistics delta");
                }
            }
        }
    }

    pub fn template_stats(&self, template_id: &str) -> Option<TemplateStatsInfo> {
        self.per_template.get(template_id).map(|c| TemplateStatsInfo {
            template_id: template_id.to_string(),
            sent_count: c.sent.load(Ordering::Relaxed),
            failed_count: c.failed.load(Ordering::Relaxed),
            last_sent_at: *c.last_sent_at.read(),
        })
    }

    pub fn group_stats(&self, group_id: &str) -> Option<GroupStatsInfo> {
        self.per_group.get(group_id).map(|c| GroupStatsInfo {
            group_id: group_id.to_string(),
            sent_count: c.sent.load(Ordering::Relaxed),
            failed_count: c.failed.load(Ordering::Relaxed),
        })
    }

    pub fn trigger_stats(&self, trigger_id: &str) -> Option<TriggerStatsInfo> {
        self.per_trigger.get(trigger_id).map(|c| TriggerStatsInfo {
            trigger_id: trigger_id.to_string(),
            fired_count: c.fired.load(Ordering::Relaxed),
            suppressed_count: c.suppressed.load(Ordering::Relaxed),
        })
    }

    /// Zero all in-process counters.
    pub fn reset(&self) {
        self.per_template.clear();
        self.per_group.clear();
        self.per_trigger.clear();
    }
}

impl Default for StatisticsAggregator {
    fn default() -> Self {
        Self::new()
    }
}
