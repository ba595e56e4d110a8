//! Schedule calculator — pure trigger-to-next-due-time computation.
//!
//! Triggers are a closed set; each kind carries its own typed payload so
//! invalid combinations are unrepresentable once parsed. Parsing fails
//! fast with a validation error; callers never silently default.

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use taskweave_core::error::{Result, TaskweaveError};
use taskweave_core::types::TriggerKind;

/// Largest accepted `interval_hours` value (30 days).
const MAX_INTERVAL_HOURS: i64 = 720;

/// Fallback timestamp formats accepted for `once` triggers, tried after
/// RFC 3339. Naive values are interpreted in the task's timezone.
const ONCE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M",
];

/// A parsed trigger with its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Never auto-runs.
    Manual,
    /// Runs once at an absolute instant; the runner clears it after it
    /// has fired.
    Once(DateTime<Utc>),
    /// Runs every day at a wall-clock time in the task's timezone.
    Daily { hour: u32, minute: u32 },
    /// Runs every N hours from "now".
    IntervalHours(i64),
}

impl Trigger {
    /// Parse a trigger value according to its kind. Unparseable values
    /// and out-of-range components are validation errors.
    pub fn resolve(kind: TriggerKind, value: &str, tz: &Tz) -> Result<Self> {
        match kind {
            TriggerKind::Manual => Ok(Trigger::Manual),
            TriggerKind::Once => parse_once(value, tz).map(Trigger::Once),
            TriggerKind::Daily => parse_daily(value),
            TriggerKind::IntervalHours => parse_interval_hours(value),
        }
    }

    /// Compute the next due instant strictly relative to `now`.
    pub fn next_after(&self, now: DateTime<Utc>, tz: &Tz) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Manual => None,
            // Returned verbatim; the caller nulls it out once fired.
            Trigger::Once(at) => Some(*at),
            Trigger::Daily { hour, minute } => {
                let time = NaiveTime::from_hms_opt(*hour, *minute, 0)?;
                let mut date = now.with_timezone(tz).date_naive();
                // Today's occurrence, or the next day it both exists
                // (DST gaps) and lies strictly after now.
                for _ in 0..3 {
                    if let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest()
                    {
                        let candidate = candidate.with_timezone(&Utc);
                        if candidate > now {
                            return Some(candidate);
                        }
                    }
                    date = date.succ_opt()?;
                }
                None
            }
            Trigger::IntervalHours(n) => Some(now + Duration::hours(*n)),
        }
    }
}

/// Resolve an IANA timezone name; empty means UTC.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    if name.trim().is_empty() {
        return Ok(chrono_tz::UTC);
    }
    name.trim()
        .parse()
        .map_err(|_| TaskweaveError::Validation(format!("unknown timezone '{name}'")))
}

/// The calculator's public entry: next due instant or `None` (manual),
/// or a validation failure.
pub fn compute_next_due(
    kind: TriggerKind,
    value: &str,
    timezone: &str,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    // Manual never schedules, regardless of value or timezone.
    if kind == TriggerKind::Manual {
        return Ok(None);
    }
    let tz = parse_timezone(timezone)?;
    let trigger = Trigger::resolve(kind, value, &tz)?;
    Ok(trigger.next_after(now, &tz))
}

fn parse_once(value: &str, tz: &Tz) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ONCE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| {
                    TaskweaveError::Validation(format!(
                        "'{value}' does not exist in timezone {tz}"
                    ))
                });
        }
    }
    Err(TaskweaveError::Validation(format!(
        "unparseable once trigger '{value}'"
    )))
}

fn parse_daily(value: &str) -> Result<Trigger> {
    let invalid =
        || TaskweaveError::Validation(format!("daily trigger must be HH:MM, got '{value}'"));
    let (h, m) = value.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = h.trim().parse().map_err(|_| invalid())?;
    let minute: u32 = m.trim().parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok(Trigger::Daily { hour, minute })
}

fn parse_interval_hours(value: &str) -> Result<Trigger> {
    let hours: i64 = value.trim().parse().map_err(|_| {
        TaskweaveError::Validation(format!("interval_hours must be an integer, got '{value}'"))
    })?;
    if hours < 1 || hours > MAX_INTERVAL_HOURS {
        return Err(TaskweaveError::Validation(format!(
            "interval_hours must be 1-{MAX_INTERVAL_HOURS}, got {hours}"
        )));
    }
    Ok(Trigger::IntervalHours(hours))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn shanghai() -> Tz {
        "Asia/Shanghai".parse().unwrap()
    }

    #[test]
    fn test_daily_past_today_rolls_to_tomorrow() {
        let tz = shanghai();
        let now = tz
            .with_ymd_and_hms(2026, 3, 1, 10, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let next = compute_next_due(TriggerKind::Daily, "09:00", "Asia/Shanghai", now)
            .unwrap()
            .unwrap();
        let expected = tz.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        assert_eq!(next, expected.with_timezone(&Utc));
    }

    #[test]
    fn test_daily_future_today_stays_today() {
        let tz = shanghai();
        let now = tz
            .with_ymd_and_hms(2026, 3, 1, 8, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let next = compute_next_due(TriggerKind::Daily, "09:00", "Asia/Shanghai", now)
            .unwrap()
            .unwrap();
        let expected = tz.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        assert_eq!(next, expected.with_timezone(&Utc));
    }

    #[test]
    fn test_daily_exactly_now_advances() {
        // "Not strictly after now" rolls to the next day.
        let tz = shanghai();
        let now = tz
            .with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let next = compute_next_due(TriggerKind::Daily, "09:00", "Asia/Shanghai", now)
            .unwrap()
            .unwrap();
        assert_eq!(next.with_timezone(&shanghai()).day(), 2);
    }

    #[test]
    fn test_interval_hours() {
        let now = Utc::now();
        let next = compute_next_due(TriggerKind::IntervalHours, "2", "UTC", now)
            .unwrap()
            .unwrap();
        let delta = (next - (now + Duration::hours(2))).num_seconds().abs();
        assert!(delta <= 1);
    }

    #[test]
    fn test_manual_never_schedules() {
        let now = Utc::now();
        assert_eq!(
            compute_next_due(TriggerKind::Manual, "whatever", "Not/AZone", now).unwrap(),
            None
        );
        assert_eq!(
            compute_next_due(TriggerKind::Manual, "", "", now).unwrap(),
            None
        );
    }

    #[test]
    fn test_invalid_daily_rejected() {
        let now = Utc::now();
        assert!(compute_next_due(TriggerKind::Daily, "25:30", "UTC", now).is_err());
        assert!(compute_next_due(TriggerKind::Daily, "09:60", "UTC", now).is_err());
        assert!(compute_next_due(TriggerKind::Daily, "nine", "UTC", now).is_err());
        assert!(compute_next_due(TriggerKind::Daily, "09", "UTC", now).is_err());
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        let now = Utc::now();
        assert!(compute_next_due(TriggerKind::Daily, "09:00", "Mars/Olympus", now).is_err());
    }

    #[test]
    fn test_interval_bounds() {
        let now = Utc::now();
        assert!(compute_next_due(TriggerKind::IntervalHours, "0", "UTC", now).is_err());
        assert!(compute_next_due(TriggerKind::IntervalHours, "-3", "UTC", now).is_err());
        assert!(compute_next_due(TriggerKind::IntervalHours, "721", "UTC", now).is_err());
        assert!(compute_next_due(TriggerKind::IntervalHours, "abc", "UTC", now).is_err());
        assert!(compute_next_due(TriggerKind::IntervalHours, "720", "UTC", now).is_ok());
    }

    #[test]
    fn test_once_rfc3339_kept_verbatim() {
        let now = Utc::now();
        let next = compute_next_due(
            TriggerKind::Once,
            "2026-05-01T15:30:00+08:00",
            "Asia/Shanghai",
            now,
        )
        .unwrap()
        .unwrap();
        assert_eq!(next.hour(), 7); // 15:30+08:00 == 07:30 UTC
        assert_eq!(next.minute(), 30);
    }

    #[test]
    fn test_once_naive_read_in_task_timezone() {
        let now = Utc::now();
        let next = compute_next_due(TriggerKind::Once, "2026-05-01 15:30", "Asia/Shanghai", now)
            .unwrap()
            .unwrap();
        let expected = shanghai().with_ymd_and_hms(2026, 5, 1, 15, 30, 0).unwrap();
        assert_eq!(next, expected.with_timezone(&Utc));
    }

    #[test]
    fn test_once_unparseable_rejected() {
        let now = Utc::now();
        assert!(compute_next_due(TriggerKind::Once, "next tuesday", "UTC", now).is_err());
    }

    #[test]
    fn test_once_returned_even_if_past() {
        // The calculator returns the instant verbatim; expiring fired
        // once-triggers is the runner's job.
        let now = Utc::now();
        let next = compute_next_due(TriggerKind::Once, "2020-01-01 00:00", "UTC", now)
            .unwrap()
            .unwrap();
        assert!(next < now);
    }
}
