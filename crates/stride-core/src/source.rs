//! Read-only adapter over the externally recorded event log.
//!
//! Events are immutable facts owned by another system; this adapter only
//! counts them. All ranges are half-open `[from, to)` UTC intervals, and
//! timestamps are normalized through SQLite's `datetime()` so mixed ISO-8601
//! offset spellings compare consistently and boundary events are never
//! double-counted across adjacent study days.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::{Connection, OpenFlags, params};
use tracing::debug;

use crate::error::SourceError;
use crate::requirements::EngagementScope;

/// Engagement counts for one range: the total plus a per-kind breakdown
/// keyed by the raw engagement type recorded at the source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngagementCounts {
    pub total: u32,
    pub by_kind: BTreeMap<String, u32>,
}

/// Read-only view over a participant's recorded events.
pub trait EventSource {
    /// Instant of the participant's earliest retrieval event, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] when the query fails or times out.
    fn first_event_at(&self, user_did: &str) -> Result<Option<DateTime<Utc>>, SourceError>;

    /// Retrieval events in `[from, to)`.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] when the query fails or times out.
    fn count_retrievals(
        &self,
        user_did: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u32, SourceError>;

    /// Engagement events in `[from, to)` under the given scope.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] when the query fails or times out.
    fn count_engagements(
        &self,
        user_did: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        scope: EngagementScope,
    ) -> Result<EngagementCounts, SourceError>;
}

/// [`EventSource`] over the external compliance SQLite database
/// (`feed_requests` and `engagements` tables).
pub struct SqliteEventSource {
    conn: Connection,
    timeout: Duration,
}

impl SqliteEventSource {
    /// Open the event database read-only.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] when the database cannot be opened.
    pub fn open(path: &Path, timeout: Duration) -> Result<Self, SourceError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(timeout)?;
        Ok(Self { conn, timeout })
    }

    /// Run one query under the configured deadline. A watchdog thread
    /// interrupts the connection when the deadline elapses, which surfaces
    /// here as [`SourceError::Timeout`] — a per-participant error, never a
    /// fatal one.
    fn with_deadline<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, SourceError> {
        let handle = self.conn.get_interrupt_handle();
        let timeout = self.timeout;
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let watchdog = thread::spawn(move || {
            if done_rx.recv_timeout(timeout).is_err() {
                handle.interrupt();
            }
        });

        let result = f(&self.conn);
        let _ = done_tx.send(());
        let _ = watchdog.join();

        result.map_err(|err| {
            if is_interrupted(&err) {
                SourceError::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }
            } else {
                SourceError::Query(err)
            }
        })
    }
}

fn is_interrupted(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::OperationInterrupted
    )
}

impl EventSource for SqliteEventSource {
    fn first_event_at(&self, user_did: &str) -> Result<Option<DateTime<Utc>>, SourceError> {
        let earliest: Option<String> = self.with_deadline(|conn| {
            conn.query_row(
                "SELECT MIN(datetime(timestamp)) FROM feed_requests WHERE requester_did = ?1",
                params![user_did],
                |row| row.get(0),
            )
        })?;

        match earliest {
            None => Ok(None),
            Some(raw) => {
                let parsed = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
                    .map_err(|_| SourceError::Query(rusqlite::Error::InvalidQuery))?;
                Ok(Some(Utc.from_utc_datetime(&parsed)))
            }
        }
    }

    fn count_retrievals(
        &self,
        user_did: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u32, SourceError> {
        let count: i64 = self.with_deadline(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM feed_requests \
                 WHERE requester_did = ?1 \
                   AND datetime(timestamp) >= datetime(?2) \
                   AND datetime(timestamp) < datetime(?3)",
                params![user_did, from.to_rfc3339(), to.to_rfc3339()],
                |row| row.get(0),
            )
        })?;
        debug!(user_did, %from, %to, count, "counted retrievals");
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn count_engagements(
        &self,
        user_did: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        scope: EngagementScope,
    ) -> Result<EngagementCounts, SourceError> {
        // The provenance join behind `matched` is deployment policy: a
        // nullable `matched` flag column set by the verification pipeline.
        let sql = match scope {
            EngagementScope::Any => {
                "SELECT engagement_type, COUNT(*) FROM engagements \
                 WHERE did_engagement = ?1 \
                   AND datetime(timestamp) >= datetime(?2) \
                   AND datetime(timestamp) < datetime(?3) \
                 GROUP BY engagement_type"
            }
            EngagementScope::Matched => {
                "SELECT engagement_type, COUNT(*) FROM engagements \
                 WHERE did_engagement = ?1 \
                   AND matched = 1 \
                   AND datetime(timestamp) >= datetime(?2) \
                   AND datetime(timestamp) < datetime(?3) \
                 GROUP BY engagement_type"
            }
        };

        let rows: Vec<(Option<String>, i64)> = self.with_deadline(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mapped = stmt.query_map(
                params![user_did, from.to_rfc3339(), to.to_rfc3339()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            mapped.collect()
        })?;

        let mut counts = EngagementCounts::default();
        for (kind, count) in rows {
            let count = u32::try_from(count).unwrap_or(u32::MAX);
            counts.total = counts.total.saturating_add(count);
            let key = kind.unwrap_or_else(|| "unknown".to_string());
            *counts.by_kind.entry(key).or_insert(0) += count;
        }
        Ok(counts)
    }
}
