//! Study-day bucketing.
//!
//! A study day is a wall-clock-aligned interval starting at a configured
//! cutoff hour in the study's reference zone: `[cutoff on D, cutoff on D+1)`.
//! Because the boundaries are wall-clock times, a study day spans 23, 24, or
//! 25 absolute hours across DST transitions — that is intentional. The
//! mapping from instant to study day is total and deterministic; ambiguous or
//! skipped local times resolve with the pre-transition offset.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::ConfigError;

/// The resolved absolute bounds of one study day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StudyDayBounds {
    pub date: NaiveDate,
    pub start_utc: DateTime<Utc>,
    /// Exclusive end: the start of the next study day.
    pub end_utc: DateTime<Utc>,
}

/// Map an absolute instant to the study day it belongs to.
///
/// An instant before the cutoff hour (local wall clock) belongs to the
/// previous calendar date's study day.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidCutoffHour`] when `cutoff_hour` is outside
/// `0..=23`. Valid timestamps never fail.
pub fn study_day_for(
    ts: DateTime<Utc>,
    cutoff_hour: u32,
    zone: Tz,
) -> Result<NaiveDate, ConfigError> {
    let cutoff = cutoff_time(cutoff_hour)?;
    let local = ts.with_timezone(&zone);
    let date = local.date_naive();
    if local.time() < cutoff {
        Ok(date.pred_opt().unwrap_or(NaiveDate::MIN))
    } else {
        Ok(date)
    }
}

/// The absolute instant at which the given study day starts.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidCutoffHour`] for an out-of-range cutoff.
pub fn day_start(date: NaiveDate, cutoff_hour: u32, zone: Tz) -> Result<DateTime<Utc>, ConfigError> {
    let cutoff = cutoff_time(cutoff_hour)?;
    Ok(local_to_utc(zone, date.and_time(cutoff)))
}

/// Resolve the full `[start, end)` bounds of the study day containing `ts`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidCutoffHour`] for an out-of-range cutoff.
pub fn bucket(
    ts: DateTime<Utc>,
    cutoff_hour: u32,
    zone: Tz,
) -> Result<StudyDayBounds, ConfigError> {
    let date = study_day_for(ts, cutoff_hour, zone)?;
    day_bounds(date, cutoff_hour, zone)
}

/// Resolve the `[start, end)` bounds of a study day identified by its date.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidCutoffHour`] for an out-of-range cutoff.
pub fn day_bounds(
    date: NaiveDate,
    cutoff_hour: u32,
    zone: Tz,
) -> Result<StudyDayBounds, ConfigError> {
    let start_utc = day_start(date, cutoff_hour, zone)?;
    let next = date.succ_opt().unwrap_or(NaiveDate::MAX);
    let end_utc = day_start(next, cutoff_hour, zone)?;
    Ok(StudyDayBounds {
        date,
        start_utc,
        end_utc,
    })
}

fn cutoff_time(cutoff_hour: u32) -> Result<NaiveTime, ConfigError> {
    NaiveTime::from_hms_opt(cutoff_hour, 0, 0)
        .ok_or(ConfigError::InvalidCutoffHour { hour: cutoff_hour })
}

/// Convert a local wall-clock time to UTC, resolving DST edge cases with the
/// pre-transition offset.
fn local_to_utc(zone: Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        LocalResult::None => {
            // The wall time was skipped by a forward transition; apply the
            // offset in force just before the gap.
            let before = naive - Duration::hours(1);
            match zone.from_local_datetime(&before) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                    dt.with_timezone(&Utc) + Duration::hours(1)
                }
                LocalResult::None => Utc.from_utc_datetime(&naive),
            }
        }
    }
}
