//! Participant roster: enrollment status and per-participant anchor days.

use chrono::NaiveDate;
use rusqlite::{
    Connection, OptionalExtension, params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
};
use serde::Serialize;

use crate::error::StoreError;

/// Enrollment status. Only `eligible` participants are processed by a run;
/// the other states keep the row (and its snapshots) without extending them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Eligible,
    Paused,
    Withdrawn,
}

impl ParticipantStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eligible => "eligible",
            Self::Paused => "paused",
            Self::Withdrawn => "withdrawn",
        }
    }
}

impl ToSql for ParticipantStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ParticipantStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "eligible" => Ok(Self::Eligible),
            "paused" => Ok(Self::Paused),
            "withdrawn" => Ok(Self::Withdrawn),
            other => Err(FromSqlError::Other(
                format!("unknown participant status {other:?}").into(),
            )),
        }
    }
}

/// One roster row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub user_did: String,
    pub study_label: String,
    /// Notification address owned by the external mail subsystem; carried
    /// through unchanged, never interpreted here.
    pub contact: Option<String>,
    pub status: ParticipantStatus,
    pub anchor_day: Option<NaiveDate>,
}

/// Add a participant as `eligible` with no anchor yet. Re-enrolling an
/// existing DID is a no-op.
///
/// # Errors
///
/// Returns a [`StoreError`] if the write fails.
pub fn enroll(
    conn: &Connection,
    user_did: &str,
    study_label: &str,
    contact: Option<&str>,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO participants (user_did, study_label, contact) VALUES (?1, ?2, ?3)",
        params![user_did, study_label, contact],
    )?;
    Ok(())
}

/// Change a participant's status.
///
/// # Errors
///
/// Returns a [`StoreError`] if the write fails.
pub fn set_status(
    conn: &Connection,
    user_did: &str,
    status: ParticipantStatus,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE participants SET status = ?2 WHERE user_did = ?1",
        params![user_did, status],
    )?;
    Ok(())
}

fn participant_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Participant> {
    let anchor_raw: Option<String> = row.get(4)?;
    let anchor_day = anchor_raw
        .map(|raw| {
            raw.parse::<NaiveDate>().map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    Box::new(error),
                )
            })
        })
        .transpose()?;
    Ok(Participant {
        user_did: row.get(0)?,
        study_label: row.get(1)?,
        contact: row.get(2)?,
        status: row.get(3)?,
        anchor_day,
    })
}

/// All `eligible` participants, ordered by DID for deterministic runs.
///
/// # Errors
///
/// Returns a [`StoreError`] if the query fails.
pub fn eligible_participants(conn: &Connection) -> Result<Vec<Participant>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT user_did, study_label, contact, status, anchor_day
         FROM participants
         WHERE status = 'eligible'
         ORDER BY user_did",
    )?;
    let participants = stmt
        .query_map([], participant_from_row)?
        .collect::<rusqlite::Result<_>>()?;
    Ok(participants)
}

/// Look up one roster row.
///
/// # Errors
///
/// Returns a [`StoreError`] if the query fails.
pub fn get_participant(
    conn: &Connection,
    user_did: &str,
) -> Result<Option<Participant>, StoreError> {
    let participant = conn
        .query_row(
            "SELECT user_did, study_label, contact, status, anchor_day
             FROM participants
             WHERE user_did = ?1",
            params![user_did],
            participant_from_row,
        )
        .optional()?;
    Ok(participant)
}

/// Persist the participant's anchor day, but only if none is stored yet.
/// The anchor is fixed once observed; later events never move it.
///
/// # Errors
///
/// Returns a [`StoreError`] if the write fails.
pub fn set_anchor_day(
    conn: &Connection,
    user_did: &str,
    anchor: NaiveDate,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE participants SET anchor_day = ?2
         WHERE user_did = ?1 AND anchor_day IS NULL",
        params![user_did, anchor.to_string()],
    )?;
    Ok(())
}
