//! Storage interface for delivery attempts, statistics, and triggers.
//!
//! Durability and schema are owned externally; the engine only talks to the
//! [`DeliveryStore`] trait. The in-memory implementation backs tests and
//! single-process deployments without persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::Result;
use crate::domain::{DeliveryAttempt, ReminderTrigger};

/// One of the three statistics projections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatsView {
    Template(String),
    Group(String),
    Trigger(String),
}

impl StatsView {
    fn key(&self) -> String {
        match self {
            Self::Template(id) => format!("template:{id}"),
            Self::Group(id) => format!("group:{id}"),
            Self::Trigger(id) => format!("trigger:{id}"),
        }
    }
}

/// Counter increments for one statistics view.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsDelta {
    pub success: u64,
    pub failure: u64,
    pub last_sent_at: Option<DateTime<Utc>>,
}

/// Persistence seam consumed by the engine.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Append one attempt to the audit trail.
    async fn append_attempt(&self, attempt: &DeliveryAttempt) -> Result<()>;

    /// Apply a counter delta to one statistics view.
    async fn upsert_stats(&self, view: StatsView, delta: StatsDelta) -> Result<()>;

    /// Triggers to register at startup.
    async fn load_active_triggers(&self) -> Result<Vec<ReminderTrigger>>;

    /// Audit trail of one occurrence, in append order.
    async fn attempts_for_occurrence(&self, occurrence_id: &str) -> Result<Vec<DeliveryAttempt>>;
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    attempts: RwLock<Vec<DeliveryAttempt>>,
    stats: DashMap<String, StatsDelta>,
    triggers: RwLock<Vec<ReminderTrigger>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed triggers returned by `load_active_triggers`.
    pub fn with_triggers(triggers: Vec<ReminderTrigger>) -> Self {
        Self {
            triggers: RwLock::new(triggers),
            ..Default::default()
        }
    }

    /// Persisted counters for one view, when any delta was applied.
    pub fn stats_for(&self, view: &StatsView) -> Option<StatsDelta> {
        self.stats.get(&view.key()).map(|d| *d)
    }
}

#[async_trait]
impl DeliveryStore for InMemoryStore {
    async fn append_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        self.attempts.write().push(attempt.clone());
        Ok(())
    }

    async fn upsert_stats(&self, view: StatsView, delta: StatsDelta) -> Result<()> {
        let mut entry = self.stats.entry(view.key()).or_default();
        entry.success += delta.success;
        entry.failure += delta.failure;
        if delta.last_sent_at.is_some() {
            entry.last_sent_at = delta.last_sent_at;
        }
        Ok(())
    }

    async fn load_active_triggers(&self) -> Result<Vec<ReminderTrigger>> {
        Ok(self
            .triggers
            .read()
            .iter()
            .filter(|t| t.active)
            .cloned()
            .collect())
    }

    async fn attempts_for_occurrence(&self, occurrence_id: &str) -> Result<Vec<DeliveryAttempt>> {
        Ok(self
            .attempts
            .read()
            .iter()
            .filter(|a| a.occurrence_id == occurrence_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AttemptOutcome, ChannelKind, ChannelResponse};

    fn attempt(occurrence_id: &str, n: u32) -> DeliveryAttempt {
        DeliveryAttempt {
            occurrence_id: occurrence_id.to_string(),
            channel: ChannelKind::Email,
            attempt_number: n,
            started_at: Utc::now(),
            outcome: AttemptOutcome::Delivered(ChannelResponse {
                delivered_at: Utc::now(),
                provider_message_id: None,
            }),
            next_retry_at: None,
        }
    }

    #[tokio::test]
    async fn test_append_and_query_attempts() {
        let store = InMemoryStore::new();
        store.append_attempt(&attempt("occ-1", 1)).await.unwrap();
        store.append_attempt(&attempt("occ-2", 1)).await.unwrap();
        store.append_attempt(&attempt("occ-1", 2)).await.unwrap();

        let trail = store.attempts_for_occurrence("occ-1").await.unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].attempt_number, 1);
        assert_eq!(trail[1].attempt_number, 2);
    }

    #[tokio::test]
    async fn test_upsert_stats_accumulates() {
        let store = InMemoryStore::new();
        let view = StatsView::Template("tpl-1".to_string());
        let sent_at = Utc::now();

        store
            .upsert_stats(
                view.clone(),
                StatsDelta {
                    success: 1,
                    failure: 0,
                    last_sent_at: Some(sent_at),
                },
            )
            .await
            .unwrap();
        store
            .upsert_stats(
                view.clone(),
                StatsDelta {
                    success: 0,
                    failure: 1,
                    last_sent_at: None,
                },
            )
            .await
            .unwrap();

        let stats = store.stats_for(&view).unwrap();
        assert_eq!(stats.success, 1);
        assert_eq!(stats.failure, 1);
        assert_eq!(stats.last_sent_at, Some(sent_at));
    }

    #[tokio::test]
    async fn test_load_active_triggers_filters_inactive() {
        let t1 = ReminderTrigger {
            id: "t-1".to_string(),
            account_id: "acct-1".to_string(),
            schedule: "0 * * * * *".to_string(),
            timezone: None,
            template_id: "tpl-1".to_string(),
            group_id: "grp-1".to_string(),
            channels: vec![ChannelKind::Email],
            priority: Default::default(),
            variables: Default::default(),
            next_fire_at: Utc::now(),
            active: true,
        };
        let t2 = ReminderTrigger {
            id: "t-2".to_string(),
            active: false,
            ..t1.clone()
        };

        let store = InMemoryStore::with_triggers(vec![t1, t2]);
        let loaded = store.load_active_triggers().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "t-1");
    }
}
