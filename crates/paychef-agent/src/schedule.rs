//! Monthly payroll schedule.
//!
//! A background task wakes once a minute and starts a run when the stored
//! day/hour/minute (UTC) falls between the previous check and now. A late
//! tick therefore cannot skip the scheduled minute, and each minute is
//! covered by exactly one check.

use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::api::AppState;

const TICK: Duration = Duration::from_secs(60);

/// How far back a single check looks after a long stall.
const MAX_CATCH_UP_MINUTES: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// 1-31. Months without that day are skipped.
    pub day_of_month: u32,
    /// 0-23, UTC.
    pub hour:         u32,
    /// 0-59.
    pub minute:       u32,
    pub enabled:      bool,
    pub created_at:   u64,
}

impl ScheduleConfig {
    pub fn new(day_of_month: u32, hour: u32, minute: u32, now: u64) -> anyhow::Result<Self> {
        if !(1..=31).contains(&day_of_month) {
            anyhow::bail!("day_of_month {day_of_month} not in 1..=31");
        }
        if hour > 23 {
            anyhow::bail!("hour {hour} not in 0..=23");
        }
        if minute > 59 {
            anyhow::bail!("minute {minute} not in 0..=59");
        }
        Ok(Self { day_of_month, hour, minute, enabled: true, created_at: now })
    }

    /// Equivalent five-field cron expression.
    pub fn cron_expression(&self) -> String {
        format!("{} {} {} * *", self.minute, self.hour, self.day_of_month)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && now.day() == self.day_of_month
            && now.hour() == self.hour
            && now.minute() == self.minute
    }

    /// True when a scheduled minute lies in `(after, upto]`, both minute keys.
    pub fn is_due_between(&self, after: i64, upto: i64) -> bool {
        let from = after.saturating_add(1).max(upto - MAX_CATCH_UP_MINUTES + 1);
        (from..=upto).any(|key| {
            DateTime::<Utc>::from_timestamp(key * 60, 0).is_some_and(|t| self.is_due(t))
        })
    }
}

/// Minute bucket: whole minutes since the epoch.
fn minute_key(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(60)
}

/// Spawn the scheduler loop on the current runtime.
pub fn spawn(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(state))
}

async fn run(state: AppState) {
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The current minute is still eligible on the first tick.
    let mut checked_through = minute_key(Utc::now()) - 1;

    match state.db().load_schedule() {
        Ok(Some(s)) if s.enabled => tracing::info!(
            cron = %s.cron_expression(),
            "Scheduler loaded: day {} at {:02}:{:02} UTC",
            s.day_of_month, s.hour, s.minute,
        ),
        Ok(_) => tracing::info!("Scheduler idle (no enabled schedule)"),
        Err(e) => tracing::warn!("Scheduler could not read schedule: {e}"),
    }

    loop {
        interval.tick().await;
        let now = minute_key(Utc::now());

        let schedule = match state.db().load_schedule() {
            Ok(Some(s)) => s,
            Ok(None) => {
                checked_through = now;
                continue;
            }
            // Leave the window open so the next tick re-checks it.
            Err(e) => {
                tracing::warn!("Scheduler could not read schedule: {e}");
                continue;
            }
        };
        let due = schedule.is_due_between(checked_through, now);
        checked_through = now;
        if !due {
            continue;
        }

        tracing::info!(cron = %schedule.cron_expression(), "Scheduled payroll triggered");
        match state.run_payroll().await {
            Ok(record) => tracing::info!(
                run_id = %record.run_id,
                paid   = record.paid_count(),
                failed = record.failed_count(),
                "Scheduled payroll finished",
            ),
            Err(e) => tracing::error!("Scheduled payroll failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn validates_ranges() {
        assert!(ScheduleConfig::new(0, 9, 0, 0).is_err());
        assert!(ScheduleConfig::new(32, 9, 0, 0).is_err());
        assert!(ScheduleConfig::new(1, 24, 0, 0).is_err());
        assert!(ScheduleConfig::new(1, 0, 60, 0).is_err());
        let s = ScheduleConfig::new(31, 23, 59, 5).unwrap();
        assert!(s.enabled);
        assert_eq!(s.created_at, 5);
    }

    #[test]
    fn cron_expression_matches_fields() {
        let s = ScheduleConfig::new(28, 9, 30, 0).unwrap();
        assert_eq!(s.cron_expression(), "30 9 28 * *");
    }

    #[test]
    fn due_only_on_exact_minute() {
        let s = ScheduleConfig::new(28, 9, 30, 0).unwrap();
        let at = |d, h, m| Utc.with_ymd_and_hms(2026, 3, d, h, m, 15).unwrap();

        assert!(s.is_due(at(28, 9, 30)));
        assert!(!s.is_due(at(28, 9, 31)));
        assert!(!s.is_due(at(28, 10, 30)));
        assert!(!s.is_due(at(27, 9, 30)));

        let mut disabled = s.clone();
        disabled.enabled = false;
        assert!(!disabled.is_due(at(28, 9, 30)));
    }

    #[test]
    fn late_tick_still_covers_scheduled_minute() {
        let s = ScheduleConfig::new(28, 9, 30, 0).unwrap();
        let key = |h, m, sec| minute_key(Utc.with_ymd_and_hms(2026, 3, 28, h, m, sec).unwrap());

        // previous tick at 09:29:59.9, next one late at 09:31:00.1
        assert!(s.is_due_between(key(9, 29, 59), key(9, 31, 0)));
        // the following tick does not fire again
        assert!(!s.is_due_between(key(9, 31, 0), key(9, 32, 0)));
        // a window ending exactly on the minute includes it
        assert!(s.is_due_between(key(9, 29, 0), key(9, 30, 0)));
        assert!(!s.is_due_between(key(9, 30, 0), key(9, 30, 0)));
    }

    #[test]
    fn catch_up_is_bounded() {
        let s = ScheduleConfig::new(28, 9, 30, 0).unwrap();
        let key = |d, h, m| minute_key(Utc.with_ymd_and_hms(2026, 3, d, h, m, 0).unwrap());
        assert!(s.is_due_between(key(28, 9, 0), key(28, 10, 0)));
        assert!(!s.is_due_between(key(1, 0, 0), key(28, 12, 0)));
    }

    #[test]
    fn minute_key_groups_seconds() {
        let a = Utc.with_ymd_and_hms(2026, 3, 28, 9, 30, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 3, 28, 9, 30, 59).unwrap();
        let c = Utc.with_ymd_and_hms(2026, 3, 28, 9, 31, 0).unwrap();
        assert_eq!(minute_key(a), minute_key(b));
        assert_ne!(minute_key(b), minute_key(c));
    }
}
