//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

fn default_tick_ms() -> u64 {
    1_000
}

fn default_send_timeout_secs() -> u64 {
    30
}

fn default_due_queue_capacity() -> usize {
    1_024
}

fn default_event_capacity() -> usize {
    256
}

/// Top-level engine configuration. Loadable from JSON; every field has a
/// production default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scheduler tick interval in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Upper bound on one adapter send call, in seconds.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// Capacity of the scheduler's due-event queue.
    #[serde(default = "default_due_queue_capacity")]
    pub due_queue_capacity: usize,

    /// Capacity of the delivery event broadcast.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Backoff policy for failed attempts.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            send_timeout_secs: default_send_timeout_secs(),
            due_queue_capacity: default_due_queue_capacity(),
            event_capacity: default_event_capacity(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}
