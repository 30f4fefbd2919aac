//! Do-not-disturb gate.
//!
//! Decides whether a due reminder is delivered now, deferred until the end
//! of the account's quiet window, or force-delivered as an urgent override.
//! The decision is pure: configuration is passed in at call time.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::domain::{DoNotDisturbConfig, TriggerPriority};

/// Outcome of gating one due event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// No quiet window applies; deliver immediately.
    DeliverNow,
    /// Urgent priority with the account's override enabled.
    DeliverNowOverride,
    /// Quiet window is active; re-queue for exactly this instant.
    DeferUntil(DateTime<Utc>),
}

/// Gate a due event against the account's quiet-hour configuration.
///
/// An absent configuration always delivers. Urgent events deliver as an
/// override whenever the account allows it, regardless of the window.
pub fn decide(
    config: Option<&DoNotDisturbConfig>,
    tz: Tz,
    priority: TriggerPriority,
    now: DateTime<Utc>,
) -> GateDecision {
    let Some(config) = config else {
        return GateDecision::DeliverNow;
    };

    if priority == TriggerPriority::Urgent && config.allow_urgent_override {
        return GateDecision::DeliverNowOverride;
    }

    let local = now.with_timezone(&tz);
    if !config.is_quiet(local.time()) {
        return GateDecision::DeliverNow;
    }

    // Defer to quiet_end of the current or next local day. Deferred events
    // are re-queued, never dropped.
    let mut candidate = local.date_naive().and_time(config.quiet_end);
    if config.quiet_end <= local.time() {
        candidate += Duration::days(1);
    }
    GateDecision::DeferUntil(resolve_local(tz, candidate).with_timezone(&Utc))
}

/// Resolve a naive local datetime against a timezone, tolerating DST folds
/// and gaps.
fn resolve_local(tz: Tz, mut dt: NaiveDateTime) -> DateTime<Tz> {
    for _ in 0..3 {
        match tz.from_local_datetime(&dt) {
            LocalResult::Single(t) => return t,
            LocalResult::Ambiguous(earliest, _) => return earliest,
            // Inside a DST gap the wall time does not exist; the next hour does.
            LocalResult::None => dt += Duration::hours(1),
        }
    }
    Utc.from_utc_datetime(&dt).with_timezone(&tz)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn config(start: NaiveTime, end: NaiveTime, allow_override: bool) -> DoNotDisturbConfig {
        DoNotDisturbConfig {
            account_id: "acct-1".to_string(),
            quiet_start: start,
            quiet_end: end,
            allow_urgent_override: allow_override,
            timezone: None,
        }
    }

    #[test]
    fn test_absent_config_delivers() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap();
        assert_eq!(
            decide(None, chrono_tz::UTC, TriggerPriority::Normal, now),
            GateDecision::DeliverNow
        );
    }

    #[test]
    fn test_midnight_wrap_defers_to_next_morning() {
        // 22:00-07:00 window, due at 23:00: deferred to 07:00 the next day.
        let cfg = config(t(22, 0), t(7, 0), false);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap();
        assert_eq!(
            decide(Some(&cfg), chrono_tz::UTC, TriggerPriority::Normal, now),
            GateDecision::DeferUntil(Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_midnight_wrap_early_morning_defers_same_day() {
        let cfg = config(t(22, 0), t(7, 0), false);
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap();
        assert_eq!(
            decide(Some(&cfg), chrono_tz::UTC, TriggerPriority::Normal, now),
            GateDecision::DeferUntil(Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_outside_window_delivers() {
        let cfg = config(t(22, 0), t(7, 0), false);
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        assert_eq!(
            decide(Some(&cfg), chrono_tz::UTC, TriggerPriority::Normal, now),
            GateDecision::DeliverNow
        );
    }

    #[test]
    fn test_urgent_override_always_wins() {
        let cfg = config(t(22, 0), t(7, 0), true);
        // Inside the window.
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap();
        assert_eq!(
            decide(Some(&cfg), chrono_tz::UTC, TriggerPriority::Urgent, now),
            GateDecision::DeliverNowOverride
        );
        // Outside the window too.
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            decide(Some(&cfg), chrono_tz::UTC, TriggerPriority::Urgent, now),
            GateDecision::DeliverNowOverride
        );
    }

    #[test]
    fn test_urgent_without_override_is_deferred() {
        let cfg = config(t(22, 0), t(7, 0), false);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap();
        assert!(matches!(
            decide(Some(&cfg), chrono_tz::UTC, TriggerPriority::Urgent, now),
            GateDecision::DeferUntil(_)
        ));
    }

    #[test]
    fn test_window_in_account_timezone() {
        // 22:00-07:00 in Shanghai (UTC+8): 16:00 UTC is 00:00 local, quiet.
        let cfg = config(t(22, 0), t(7, 0), false);
        let tz: Tz = "Asia/Shanghai".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 16, 0, 0).unwrap();
        let decision = decide(Some(&cfg), tz, TriggerPriority::Normal, now);
        // 07:00 local on 2026-03-02 is 23:00 UTC on 2026-03-01.
        assert_eq!(
            decision,
            GateDecision::DeferUntil(Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_defer_lands_exactly_on_quiet_end() {
        let cfg = config(t(22, 0), t(7, 30), false);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 22, 45, 12).unwrap();
        match decide(Some(&cfg), chrono_tz::UTC, TriggerPriority::Normal, now) {
            GateDecision::DeferUntil(at) => {
                assert_eq!(at, Utc.with_ymd_and_hms(2026, 3, 2, 7, 30, 0).unwrap());
            }
            other => panic!("expected deferral, got {other:?}"),
        }
    }
}
