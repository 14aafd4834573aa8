//! Streak calculator and dashboard statistics
//!
//! Streaks count consecutive calendar days, ending today, with at least one
//! completion. Days are taken in the learner's IANA timezone so DST changes
//! never add or drop a day. A missing "today" ends the walk immediately.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::warn;

use crate::model::ProgressRecord;

/// Window for `minutes_this_week`
pub const WEEK_WINDOW_DAYS: i64 = 7;

/// Parse an IANA zone name, falling back to UTC
pub fn resolve_timezone(name: &str) -> Tz {
    match name.trim().parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!("Unknown timezone '{}', counting streak days in UTC", name);
            Tz::UTC
        }
    }
}

/// Calendar date of an instant in `tz`
pub fn local_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// Consecutive active days ending today in `timezone`
pub fn streak_days<I>(completions: I, timezone: &str, now: DateTime<Utc>) -> u32
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    streak_days_in(completions, resolve_timezone(timezone), now)
}

pub fn streak_days_in<I>(completions: I, tz: Tz, now: DateTime<Utc>) -> u32
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let days: BTreeSet<NaiveDate> = completions.into_iter().map(|at| local_date(at, tz)).collect();

    let mut streak = 0;
    let mut cursor = Some(local_date(now, tz));
    while let Some(day) = cursor {
        if !days.contains(&day) {
            break;
        }
        streak += 1;
        cursor = day.pred_opt();
    }
    streak
}

/// Minutes spent on lessons completed in the last seven days
pub fn minutes_this_week(records: &[ProgressRecord], now: DateTime<Utc>) -> u32 {
    let since = now - Duration::days(WEEK_WINDOW_DAYS);
    records
        .iter()
        .filter(|r| r.is_completed())
        .filter(|r| matches!(r.completed_at, Some(at) if at >= since && at <= now))
        .fold(0u32, |total, r| total.saturating_add(r.time_spent_minutes))
}

/// Learner dashboard numbers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub streak_days: u32,
    pub minutes_this_week: u32,
    pub completed_lessons: usize,
}

impl DashboardStats {
    pub fn from_records(records: &[ProgressRecord], timezone: &str, now: DateTime<Utc>) -> Self {
        let completions = records
            .iter()
            .filter(|r| r.is_completed())
            .filter_map(|r| r.completed_at);
        Self {
            streak_days: streak_days(completions, timezone, now),
            minutes_this_week: minutes_this_week(records, now),
            completed_lessons: records.iter().filter(|r| r.is_completed()).count(),
        }
    }
}
