//! Pure cron schedule evaluation.
//!
//! Expressions use six fields (second, minute, hour, day-of-month, month,
//! day-of-week) with `*` meaning "any". Expressions are parsed and validated
//! at trigger-creation time; an unparseable expression is rejected there and
//! can never surface at fire time.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::{Error, Result};

/// Parse and validate a schedule expression.
pub fn parse_expression(expr: &str) -> Result<Schedule> {
    Schedule::from_str(expr).map_err(|e| Error::InvalidSchedule(format!("{expr:?}: {e}")))
}

/// Resolve an optional IANA timezone name, defaulting to UTC.
pub fn parse_timezone(tz: Option<&str>) -> Result<Tz> {
    match tz {
        Some(name) => name
            .parse()
            .map_err(|_| Error::InvalidTimezone(format!("'{name}' is not a valid IANA timezone"))),
        None => Ok(chrono_tz::UTC),
    }
}

/// Next occurrence of `schedule` strictly after `after`, evaluated in `tz`.
///
/// Returns `None` when the expression has no future occurrence (e.g. a
/// fixed calendar date that has passed).
pub fn next_occurrence(schedule: &Schedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let after_local = after.with_timezone(&tz);
    schedule
        .after(&after_local)
        .next()
        .map(|t| t.with_timezone(&Utc))
}
