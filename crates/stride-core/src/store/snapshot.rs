//! Snapshot rows: the durable, idempotent output of aggregation.
//!
//! Writes go through a full-row upsert keyed on
//! `(user_did, study_day, requirement_label)`, so re-running a day is safe
//! and converges on the same stored state.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use crate::error::StoreError;
use crate::requirements::RequirementSet;
use crate::rules::CumulativeState;
use crate::source::EngagementCounts;

/// One finalized study day for one participant under one requirement label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySnapshot {
    pub user_did: String,
    pub study_day: NaiveDate,
    pub requirement_label: String,
    pub day_index: u32,
    pub retrieval_count: u32,
    pub engagement_count: u32,
    pub engagement_breakdown: BTreeMap<String, u32>,
    pub is_active: bool,
    pub cumulative_active: u32,
    pub cumulative_skipped: u32,
    pub skip_streak: u32,
    pub window_violation: bool,
    pub on_track: bool,
}

impl DailySnapshot {
    /// The cumulative state this row leaves behind for the next study day.
    #[must_use]
    pub const fn cumulative_state(&self) -> CumulativeState {
        CumulativeState {
            active: self.cumulative_active,
            skipped: self.cumulative_skipped,
            skip_streak: self.skip_streak,
            violated: self.window_violation,
        }
    }
}

/// Per-day activity totals for a window report, cheaper than a full row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayActivity {
    pub study_day: NaiveDate,
    pub day_index: u32,
    pub retrieval_count: u32,
    pub engagement_count: u32,
    pub is_active: bool,
}

/// Aggregate view of one participant's stored window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowSummary {
    pub user_did: String,
    pub requirement_label: String,
    pub days_recorded: u32,
    pub active_days: u32,
    pub skipped_days: u32,
    pub window_violation: bool,
    pub on_track: bool,
    pub engagement_breakdown: BTreeMap<String, u32>,
}

/// Insert or replace one snapshot row. Every computed column is written, so
/// a force re-run overwrites stale state completely.
///
/// # Errors
///
/// Returns a [`StoreError`] if the write fails.
pub fn upsert_snapshot(conn: &Connection, snapshot: &DailySnapshot) -> Result<(), StoreError> {
    let breakdown = serde_json::to_string(&snapshot.engagement_breakdown)
        .map_err(|_| StoreError::Malformed {
            column: "engagement_breakdown",
            value: format!("{:?}", snapshot.engagement_breakdown),
        })?;

    conn.execute(
        "INSERT INTO daily_snapshots (
            user_did, study_day, requirement_label, day_index,
            retrieval_count, engagement_count, engagement_breakdown,
            is_active, cumulative_active, cumulative_skipped, skip_streak,
            window_violation, on_track, computed_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
            strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
        )
        ON CONFLICT (user_did, study_day, requirement_label) DO UPDATE SET
            day_index = excluded.day_index,
            retrieval_count = excluded.retrieval_count,
            engagement_count = excluded.engagement_count,
            engagement_breakdown = excluded.engagement_breakdown,
            is_active = excluded.is_active,
            cumulative_active = excluded.cumulative_active,
            cumulative_skipped = excluded.cumulative_skipped,
            skip_streak = excluded.skip_streak,
            window_violation = excluded.window_violation,
            on_track = excluded.on_track,
            computed_at = excluded.computed_at",
        params![
            snapshot.user_did,
            snapshot.study_day.to_string(),
            snapshot.requirement_label,
            snapshot.day_index,
            snapshot.retrieval_count,
            snapshot.engagement_count,
            breakdown,
            snapshot.is_active,
            snapshot.cumulative_active,
            snapshot.cumulative_skipped,
            snapshot.skip_streak,
            snapshot.window_violation,
            snapshot.on_track,
        ],
    )?;
    Ok(())
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<(DailySnapshot, String)> {
    let study_day: String = row.get(1)?;
    let breakdown_raw: String = row.get(6)?;
    let date = study_day.parse::<NaiveDate>().map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(error))
    })?;
    Ok((
        DailySnapshot {
            user_did: row.get(0)?,
            study_day: date,
            requirement_label: row.get(2)?,
            day_index: row.get(3)?,
            retrieval_count: row.get(4)?,
            engagement_count: row.get(5)?,
            engagement_breakdown: BTreeMap::new(),
            is_active: row.get(7)?,
            cumulative_active: row.get(8)?,
            cumulative_skipped: row.get(9)?,
            skip_streak: row.get(10)?,
            window_violation: row.get(11)?,
            on_track: row.get(12)?,
        },
        breakdown_raw,
    ))
}

fn parse_breakdown(raw: &str) -> Result<BTreeMap<String, u32>, StoreError> {
    serde_json::from_str(raw).map_err(|_| StoreError::Malformed {
        column: "engagement_breakdown",
        value: raw.to_string(),
    })
}

const SNAPSHOT_COLUMNS: &str = "user_did, study_day, requirement_label, day_index, \
     retrieval_count, engagement_count, engagement_breakdown, is_active, \
     cumulative_active, cumulative_skipped, skip_streak, window_violation, on_track";

/// Cumulative state as of the latest stored day strictly before `day`, or
/// zeros when no earlier day exists.
///
/// # Errors
///
/// Returns a [`StoreError`] if the query fails.
pub fn get_latest_cumulative(
    conn: &Connection,
    user_did: &str,
    label: &str,
    day: NaiveDate,
) -> Result<CumulativeState, StoreError> {
    let state = conn
        .query_row(
            "SELECT cumulative_active, cumulative_skipped, skip_streak, window_violation
             FROM daily_snapshots
             WHERE user_did = ?1 AND requirement_label = ?2 AND study_day < ?3
             ORDER BY study_day DESC
             LIMIT 1",
            params![user_did, label, day.to_string()],
            |row| {
                Ok(CumulativeState {
                    active: row.get(0)?,
                    skipped: row.get(1)?,
                    skip_streak: row.get(2)?,
                    violated: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(state.unwrap_or_default())
}

/// All stored snapshot rows for a participant and label in `[from, to]`,
/// ordered by study day.
///
/// # Errors
///
/// Returns a [`StoreError`] if the query fails or a stored row cannot be
/// decoded.
pub fn get_snapshot_range(
    conn: &Connection,
    user_did: &str,
    label: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<DailySnapshot>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SNAPSHOT_COLUMNS}
         FROM daily_snapshots
         WHERE user_did = ?1 AND requirement_label = ?2
           AND study_day >= ?3 AND study_day <= ?4
         ORDER BY study_day"
    ))?;
    let rows: Vec<(DailySnapshot, String)> = stmt
        .query_map(
            params![user_did, label, from.to_string(), to.to_string()],
            snapshot_from_row,
        )?
        .collect::<rusqlite::Result<_>>()?;

    rows.into_iter()
        .map(|(mut snapshot, raw)| {
            snapshot.engagement_breakdown = parse_breakdown(&raw)?;
            Ok(snapshot)
        })
        .collect()
}

/// Record the requirement parameters a run evaluated against. Identical
/// parameters under the same label collapse to a single row; any change
/// appends a new version.
///
/// # Errors
///
/// Returns a [`StoreError`] if the write fails.
pub fn register_requirement_set(
    conn: &Connection,
    reqs: &RequirementSet,
) -> Result<(), StoreError> {
    let params_json = serde_json::to_string(reqs).map_err(|_| StoreError::Malformed {
        column: "params_json",
        value: reqs.label.clone(),
    })?;
    conn.execute(
        "INSERT OR IGNORE INTO requirement_sets (label, params_json) VALUES (?1, ?2)",
        params![reqs.label, params_json],
    )?;
    Ok(())
}

/// Per-day activity for a stored window, ordered by study day.
///
/// # Errors
///
/// Returns a [`StoreError`] if the query fails.
pub fn day_activity(
    conn: &Connection,
    user_did: &str,
    label: &str,
) -> Result<Vec<DayActivity>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT study_day, day_index, retrieval_count, engagement_count, is_active
         FROM daily_snapshots
         WHERE user_did = ?1 AND requirement_label = ?2
         ORDER BY study_day",
    )?;
    let rows: Vec<(String, u32, u32, u32, bool)> = stmt
        .query_map(params![user_did, label], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        })?
        .collect::<rusqlite::Result<_>>()?;

    rows.into_iter()
        .map(|(raw, day_index, retrieval_count, engagement_count, is_active)| {
            let study_day = raw.parse::<NaiveDate>().map_err(|_| StoreError::Malformed {
                column: "study_day",
                value: raw,
            })?;
            Ok(DayActivity {
                study_day,
                day_index,
                retrieval_count,
                engagement_count,
                is_active,
            })
        })
        .collect()
}

/// How many participants under a label were active versus inactive on one
/// finalized study day. Participants with no stored row for that day are not
/// counted either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyActivityCounts {
    pub study_day: NaiveDate,
    pub active: u32,
    pub inactive: u32,
}

/// Cohort-wide active/inactive totals for one study day under one label.
///
/// # Errors
///
/// Returns a [`StoreError`] if the query fails.
pub fn daily_activity_counts(
    conn: &Connection,
    label: &str,
    study_day: NaiveDate,
) -> Result<DailyActivityCounts, StoreError> {
    let (total, active): (u32, u32) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(is_active), 0)
         FROM daily_snapshots
         WHERE requirement_label = ?1 AND study_day = ?2",
        params![label, study_day.to_string()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(DailyActivityCounts {
        study_day,
        active,
        inactive: total - active,
    })
}

/// Summarize a participant's stored window: totals plus the flags from the
/// most recent finalized day, which carries the cumulative truth.
///
/// # Errors
///
/// Returns a [`StoreError`] if the query fails; `Ok(None)` when no days are
/// stored yet.
pub fn window_summary(
    conn: &Connection,
    user_did: &str,
    label: &str,
) -> Result<Option<WindowSummary>, StoreError> {
    let latest = conn
        .query_row(
            &format!(
                "SELECT {SNAPSHOT_COLUMNS}
                 FROM daily_snapshots
                 WHERE user_did = ?1 AND requirement_label = ?2
                 ORDER BY study_day DESC
                 LIMIT 1"
            ),
            params![user_did, label],
            snapshot_from_row,
        )
        .optional()?;

    let Some((latest, _raw)) = latest else {
        return Ok(None);
    };

    let (days_recorded, active_days): (u32, u32) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(is_active), 0)
         FROM daily_snapshots
         WHERE user_did = ?1 AND requirement_label = ?2",
        params![user_did, label],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let mut breakdown: BTreeMap<String, u32> = BTreeMap::new();
    let mut stmt = conn.prepare(
        "SELECT engagement_breakdown FROM daily_snapshots
         WHERE user_did = ?1 AND requirement_label = ?2",
    )?;
    let raws: Vec<String> = stmt
        .query_map(params![user_did, label], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    for raw in raws {
        for (kind, count) in parse_breakdown(&raw)? {
            *breakdown.entry(kind).or_insert(0) += count;
        }
    }

    Ok(Some(WindowSummary {
        user_did: user_did.to_string(),
        requirement_label: label.to_string(),
        days_recorded,
        active_days,
        skipped_days: latest.cumulative_skipped,
        window_violation: latest.window_violation,
        on_track: latest.on_track,
        engagement_breakdown: breakdown,
    }))
}
