//! Reminder trigger and notification delivery engine.
//!
//! Cron-style triggers fire into a delivery pipeline: quiet-hours gating,
//! template rendering, per-(account, channel) rate limiting, channel
//! adapter sends bounded by a timeout, and exponential-backoff retry.
//! Outcomes feed per-template, per-group, and per-trigger statistics and a
//! broadcast event stream. Delivery is at-least-once.

pub mod channels;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod error;
pub mod events;
pub mod gate;
pub mod logging;
pub mod ratelimit;
pub mod retry;
pub mod schedule;
pub mod stats;
pub mod storage;
pub mod template;

pub use error::{Error, Result};
