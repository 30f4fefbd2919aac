//! Trigger scheduling.
//!
//! This module owns everything time-based:
//! - Pure cron-expression evaluation (`next_occurrence`), unit-testable
//!   independently of the timer loop
//! - The tick-driven `TriggerScheduler` that emits due events and advances
//!   `next_fire_at`

mod eval;
mod scheduler;

pub use eval::{next_occurrence, parse_expression, parse_timezone};
pub use scheduler::{DueEvent, TriggerScheduler};
