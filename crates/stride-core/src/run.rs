//! The aggregation run: catch-up finalization of study days for every
//! eligible participant.
//!
//! A run is idempotent. Each finalized day is written through a keyed upsert,
//! already-stored days are skipped unless forced, and re-running any range
//! converges on the same stored state. Per-participant failures are recorded
//! in the run report and never abort the batch; only a persistently failing
//! store does.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::day;
use crate::error::{ErrorCode, NoAnchor, StoreError};
use crate::requirements::RequirementSet;
use crate::rules::{self, CumulativeState, DayResult};
use crate::source::{EngagementCounts, EventSource};
use crate::store::{self, roster, snapshot};
use crate::window;

/// How often a failed snapshot write is retried before the participant is
/// recorded as failed.
const UPSERT_ATTEMPTS: u32 = 3;

/// Consecutive participants failing on store writes before the run aborts.
const FATAL_STORE_FAILURES: u32 = 3;

/// One recoverable failure recorded against a participant.
#[derive(Debug, Clone, Serialize)]
pub struct RunError {
    pub user_did: String,
    pub study_day: Option<NaiveDate>,
    #[serde(serialize_with = "serialize_code")]
    pub code: ErrorCode,
    pub message: String,
}

fn serialize_code<S: serde::Serializer>(code: &ErrorCode, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(code.code())
}

/// Outcome of one aggregation run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub evaluation_day: NaiveDate,
    pub requirement_label: String,
    /// Participants whose window was walked to completion.
    pub processed: u32,
    pub days_written: u32,
    /// Participants with no qualifying event yet; retried next run.
    pub skipped_no_anchor: u32,
    pub errors: Vec<RunError>,
}

/// Options controlling a single run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Restrict the run to one participant DID.
    pub user_filter: Option<String>,
    /// Recompute and overwrite days that are already stored.
    pub force: bool,
}

/// Finalize every complete study day up to (but excluding) `evaluation_day`
/// for all eligible participants.
///
/// # Errors
///
/// Returns an error when the roster cannot be read, or when
/// [`FATAL_STORE_FAILURES`] participants in a row fail on store writes,
/// which indicates the store itself is unhealthy.
pub fn run(
    store: &Connection,
    source: &dyn EventSource,
    reqs: &RequirementSet,
    zone: Tz,
    evaluation_day: NaiveDate,
    options: &RunOptions,
) -> Result<RunReport> {
    reqs.validate().context("validate requirement set")?;
    snapshot::register_requirement_set(store, reqs).context("record requirement set version")?;

    let participants = roster::eligible_participants(store).context("load eligible roster")?;
    let mut report = RunReport {
        evaluation_day,
        requirement_label: reqs.label.clone(),
        processed: 0,
        days_written: 0,
        skipped_no_anchor: 0,
        errors: Vec::new(),
    };

    let mut consecutive_store_failures = 0u32;
    for participant in participants {
        if let Some(filter) = &options.user_filter
            && participant.user_did != *filter
        {
            continue;
        }

        match run_participant(
            store,
            source,
            reqs,
            zone,
            evaluation_day,
            options.force,
            &participant,
            &mut report,
        ) {
            ParticipantOutcome::Processed => {
                report.processed += 1;
                consecutive_store_failures = 0;
            }
            ParticipantOutcome::NoAnchor => {
                report.skipped_no_anchor += 1;
                consecutive_store_failures = 0;
            }
            ParticipantOutcome::SourceFailed => {
                consecutive_store_failures = 0;
            }
            ParticipantOutcome::StoreFailed => {
                consecutive_store_failures += 1;
                if consecutive_store_failures >= FATAL_STORE_FAILURES {
                    bail!(
                        "aborting run: {consecutive_store_failures} consecutive participants \
                         failed on snapshot store writes"
                    );
                }
            }
        }
    }

    store::set_last_run_at(store, Utc::now()).context("record run completion")?;
    info!(
        evaluation_day = %report.evaluation_day,
        label = report.requirement_label,
        processed = report.processed,
        days_written = report.days_written,
        skipped_no_anchor = report.skipped_no_anchor,
        errors = report.errors.len(),
        "aggregation run finished"
    );
    Ok(report)
}

enum ParticipantOutcome {
    Processed,
    NoAnchor,
    SourceFailed,
    StoreFailed,
}

#[allow(clippy::too_many_arguments)]
fn run_participant(
    store: &Connection,
    source: &dyn EventSource,
    reqs: &RequirementSet,
    zone: Tz,
    evaluation_day: NaiveDate,
    force: bool,
    participant: &roster::Participant,
    report: &mut RunReport,
) -> ParticipantOutcome {
    let did = participant.user_did.as_str();

    let anchor = match resolve_anchor(store, source, reqs, zone, participant, report) {
        Ok(Some(anchor)) => anchor,
        Ok(None) => {
            debug!(user_did = did, "no qualifying event yet, skipping");
            return ParticipantOutcome::NoAnchor;
        }
        Err(outcome) => return outcome,
    };

    // Only complete study days are finalized; the evaluation day itself is
    // still open.
    let Some(through) = evaluation_day.pred_opt() else {
        return ParticipantOutcome::Processed;
    };

    let stored: BTreeMap<NaiveDate, snapshot::DailySnapshot> =
        match snapshot::get_snapshot_range(store, did, &reqs.label, anchor, through) {
            Ok(rows) => rows.into_iter().map(|row| (row.study_day, row)).collect(),
            Err(err) => {
                report.errors.push(store_error(did, None, &err));
                return ParticipantOutcome::StoreFailed;
            }
        };

    let mut prev = CumulativeState::default();
    for (day_index, date) in window::iterate_days(anchor, through, reqs.window_days) {
        if !force && let Some(existing) = stored.get(&date) {
            prev = existing.cumulative_state();
            continue;
        }

        let (counts_retrievals, counts_engagements) =
            match count_day(source, reqs, zone, did, date) {
                Ok(counts) => counts,
                Err(error) => {
                    report.errors.push(error);
                    return ParticipantOutcome::SourceFailed;
                }
            };

        let result = rules::evaluate_day(
            counts_retrievals,
            counts_engagements.total,
            reqs,
            prev,
            day_index,
        );
        let row = snapshot_row(did, date, reqs, day_index, counts_retrievals, &counts_engagements, result);

        if let Err(err) = upsert_with_retry(store, &row) {
            report.errors.push(store_error(did, Some(date), &err));
            return ParticipantOutcome::StoreFailed;
        }
        report.days_written += 1;
        prev = result.state();
    }

    ParticipantOutcome::Processed
}

/// The participant's anchor day: stored if present, otherwise derived from
/// the earliest observed event and persisted. An anchor never moves once
/// stored; an event that later lands before it is reported, not honored.
fn resolve_anchor(
    store: &Connection,
    source: &dyn EventSource,
    reqs: &RequirementSet,
    zone: Tz,
    participant: &roster::Participant,
    report: &mut RunReport,
) -> Result<Option<NaiveDate>, ParticipantOutcome> {
    let did = participant.user_did.as_str();

    let first_event = match source.first_event_at(did) {
        Ok(first) => first,
        Err(err) => {
            report.errors.push(RunError {
                user_did: did.to_string(),
                study_day: None,
                code: ErrorCode::from(&err),
                message: err.to_string(),
            });
            return Err(ParticipantOutcome::SourceFailed);
        }
    };

    let first_day = match first_event {
        None => return Ok(None),
        Some(ts) => match day::study_day_for(ts, reqs.cutoff_hour, zone) {
            Ok(day) => day,
            Err(err) => {
                report.errors.push(RunError {
                    user_did: did.to_string(),
                    study_day: None,
                    code: ErrorCode::InvalidConfig,
                    message: err.to_string(),
                });
                return Err(ParticipantOutcome::SourceFailed);
            }
        },
    };

    if let Some(anchor) = participant.anchor_day {
        if first_day < anchor {
            warn!(
                user_did = did,
                %anchor,
                backfilled_day = %first_day,
                "event backfilled before the stored anchor; anchor is fixed"
            );
        }
        return Ok(Some(anchor));
    }

    if let Err(err) = roster::set_anchor_day(store, did, first_day) {
        report.errors.push(store_error(did, None, &err));
        return Err(ParticipantOutcome::StoreFailed);
    }
    info!(user_did = did, anchor = %first_day, "anchored participant window");
    Ok(Some(first_day))
}

fn count_day(
    source: &dyn EventSource,
    reqs: &RequirementSet,
    zone: Tz,
    did: &str,
    date: NaiveDate,
) -> Result<(u32, EngagementCounts), RunError> {
    let bounds = day::day_bounds(date, reqs.cutoff_hour, zone).map_err(|err| RunError {
        user_did: did.to_string(),
        study_day: Some(date),
        code: ErrorCode::InvalidConfig,
        message: err.to_string(),
    })?;

    let retrievals = source
        .count_retrievals(did, bounds.start_utc, bounds.end_utc)
        .map_err(|err| source_error(did, date, &err))?;
    let engagements = source
        .count_engagements(did, bounds.start_utc, bounds.end_utc, reqs.scope)
        .map_err(|err| source_error(did, date, &err))?;

    Ok((retrievals, engagements))
}

fn snapshot_row(
    did: &str,
    date: NaiveDate,
    reqs: &RequirementSet,
    day_index: u32,
    retrievals: u32,
    engagements: &EngagementCounts,
    result: DayResult,
) -> snapshot::DailySnapshot {
    snapshot::DailySnapshot {
        user_did: did.to_string(),
        study_day: date,
        requirement_label: reqs.label.clone(),
        day_index,
        retrieval_count: retrievals,
        engagement_count: engagements.total,
        engagement_breakdown: engagements.by_kind.clone(),
        is_active: result.active,
        cumulative_active: result.cumulative_active,
        cumulative_skipped: result.cumulative_skipped,
        skip_streak: result.skip_streak,
        window_violation: result.window_violation,
        on_track: result.on_track,
    }
}

fn upsert_with_retry(
    store: &Connection,
    row: &snapshot::DailySnapshot,
) -> Result<(), StoreError> {
    let mut last_err = None;
    for attempt in 1..=UPSERT_ATTEMPTS {
        match snapshot::upsert_snapshot(store, row) {
            Ok(()) => return Ok(()),
            Err(err) => {
                warn!(
                    user_did = row.user_did,
                    study_day = %row.study_day,
                    attempt,
                    error = %err,
                    "snapshot upsert failed"
                );
                last_err = Some(err);
                if attempt < UPSERT_ATTEMPTS {
                    thread::sleep(Duration::from_millis(50 * u64::from(attempt)));
                }
            }
        }
    }
    // Loop above always sets last_err before exhausting attempts.
    Err(last_err.unwrap_or(StoreError::Malformed {
        column: "daily_snapshots",
        value: row.user_did.clone(),
    }))
}

fn source_error(did: &str, date: NaiveDate, err: &crate::error::SourceError) -> RunError {
    RunError {
        user_did: did.to_string(),
        study_day: Some(date),
        code: ErrorCode::from(err),
        message: err.to_string(),
    }
}

fn store_error(did: &str, date: Option<NaiveDate>, err: &StoreError) -> RunError {
    let code = match (err, date) {
        (StoreError::Malformed { .. }, _) => ErrorCode::MalformedCounts,
        (StoreError::Query(_), Some(_)) => ErrorCode::StoreWriteFailed,
        (StoreError::Query(_), None) => ErrorCode::StoreReadFailed,
    };
    RunError {
        user_did: did.to_string(),
        study_day: date,
        code,
        message: err.to_string(),
    }
}

/// Live, unstored view of the current (still open) study day.
#[derive(Debug, Clone, Serialize)]
pub struct TodayPreview {
    pub user_did: String,
    pub study_day: NaiveDate,
    pub retrieval_count: u32,
    pub engagement_count: u32,
    pub engagement_breakdown: BTreeMap<String, u32>,
    /// Whether the day would classify as active if it ended now.
    pub would_be_active: bool,
    /// Projection as if the day were finalized with the current counts.
    pub projection: DayResult,
}

/// Compute live counts for a participant's current study day without
/// persisting anything.
///
/// # Errors
///
/// Returns [`NoAnchor`] when the participant has no window yet, and other
/// errors when the store or source cannot be read.
pub fn preview_today(
    store: &Connection,
    source: &dyn EventSource,
    reqs: &RequirementSet,
    zone: Tz,
    now: DateTime<Utc>,
    user_did: &str,
) -> Result<TodayPreview> {
    let participant = roster::get_participant(store, user_did)
        .context("load participant")?
        .ok_or_else(|| NoAnchor {
            user_did: user_did.to_string(),
        })?;
    let anchor = participant.anchor_day.ok_or_else(|| NoAnchor {
        user_did: user_did.to_string(),
    })?;

    let bounds = day::bucket(now, reqs.cutoff_hour, zone).context("resolve current study day")?;
    let day_index = u32::try_from((bounds.date - anchor).num_days()).unwrap_or(0);

    let retrievals = source
        .count_retrievals(user_did, bounds.start_utc, bounds.end_utc)
        .context("count live retrievals")?;
    let engagements = source
        .count_engagements(user_did, bounds.start_utc, bounds.end_utc, reqs.scope)
        .context("count live engagements")?;

    let prev = snapshot::get_latest_cumulative(store, user_did, &reqs.label, bounds.date)
        .context("load cumulative state")?;
    let projection = rules::evaluate_day(retrievals, engagements.total, reqs, prev, day_index);

    Ok(TodayPreview {
        user_did: user_did.to_string(),
        study_day: bounds.date,
        retrieval_count: retrievals,
        engagement_count: engagements.total,
        engagement_breakdown: engagements.by_kind,
        would_be_active: projection.active,
        projection,
    })
}
