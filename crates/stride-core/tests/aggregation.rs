//! Full-stack aggregation tests: a real fixture event database, the real
//! SQLite source adapter, the snapshot store, and the run orchestrator.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::{Connection, params};
use stride_core::requirements::RequirementSet;
use stride_core::run::{RunOptions, run};
use stride_core::source::SqliteEventSource;
use stride_core::store::{open_store, roster, snapshot};
use tempfile::TempDir;

fn zone() -> chrono_tz::Tz {
    chrono_tz::Europe::Amsterdam
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).expect("valid date")
}

struct Fixture {
    _dir: TempDir,
    events_path: PathBuf,
    store: Connection,
}

impl Fixture {
    fn new(dids: &[&str]) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let events_path = dir.path().join("compliance.db");
        let events = Connection::open(&events_path).expect("create event db");
        events
            .execute_batch(
                "CREATE TABLE feed_requests (
                    request_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    requester_did TEXT NOT NULL,
                    timestamp TEXT NOT NULL
                );
                CREATE TABLE engagements (
                    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    did_engagement TEXT NOT NULL,
                    engagement_type TEXT NOT NULL,
                    matched INTEGER,
                    timestamp TEXT NOT NULL
                );",
            )
            .expect("create event schema");

        let store = open_store(&dir.path().join("stride.db")).expect("open store");
        for did in dids {
            roster::enroll(&store, did, "pilot", None).expect("enroll");
        }

        Self {
            _dir: dir,
            events_path,
            store,
        }
    }

    fn events(&self) -> Connection {
        Connection::open(&self.events_path).expect("open event db")
    }

    fn source(&self) -> SqliteEventSource {
        SqliteEventSource::open(&self.events_path, Duration::from_secs(5)).expect("open source")
    }

    /// One retrieval at noon UTC plus `engagements` like events.
    fn add_day(&self, did: &str, date: &str, engagements: u32) {
        let conn = self.events();
        conn.execute(
            "INSERT INTO feed_requests (requester_did, timestamp) VALUES (?1, ?2)",
            params![did, format!("{date}T12:00:00+00:00")],
        )
        .expect("insert retrieval");
        for n in 0..engagements {
            conn.execute(
                "INSERT INTO engagements (did_engagement, engagement_type, matched, timestamp) \
                 VALUES (?1, 'like', 1, ?2)",
                params![did, format!("{date}T12:{:02}:00+00:00", n + 1)],
            )
            .expect("insert engagement");
        }
    }

    fn rows(&self, did: &str) -> Vec<snapshot::DailySnapshot> {
        snapshot::get_snapshot_range(&self.store, did, "default", day(1), day(31))
            .expect("range query")
    }
}

#[test]
fn on_track_participant_over_a_full_window() {
    let fx = Fixture::new(&["did:plc:alice"]);
    // Ten active days starting Jan 5: exactly the default requirement.
    for d in 5..15 {
        fx.add_day("did:plc:alice", &format!("2024-01-{d:02}"), 3);
    }

    let reqs = RequirementSet::default_set();
    let report = run(
        &fx.store,
        &fx.source(),
        &reqs,
        zone(),
        day(19),
        &RunOptions::default(),
    )
    .expect("run succeeds");

    // Window is anchor (Jan 5) + 14 days = Jan 5..=18, all complete.
    assert_eq!(report.days_written, 14);
    let rows = fx.rows("did:plc:alice");
    let last = rows.last().expect("rows exist");
    assert_eq!(last.cumulative_active, 10);
    assert!(last.on_track, "10 active days satisfy the requirement");
    assert!(
        !last.window_violation,
        "4 skipped days are within the default budget"
    );
}

#[test]
fn off_track_participant_detected_as_soon_as_certain() {
    let fx = Fixture::new(&["did:plc:bob"]);
    // Only the anchor day is active; the rest of the window is silent.
    fx.add_day("did:plc:bob", "2024-01-05", 3);

    let reqs = RequirementSet::default_set();
    run(
        &fx.store,
        &fx.source(),
        &reqs,
        zone(),
        day(19),
        &RunOptions::default(),
    )
    .expect("run succeeds");

    let rows = fx.rows("did:plc:bob");
    assert_eq!(rows.len(), 14);
    // With 1 active day, 9 more are needed. After day index 5 only 8 days
    // remain, so that is the first finalized day that is off track.
    assert!(rows[4].on_track);
    assert!(!rows[5].on_track);
    assert!(rows.iter().skip(5).all(|r| !r.on_track));
}

#[test]
fn engagement_thresholds_gate_active_days() {
    let fx = Fixture::new(&["did:plc:carol"]);
    fx.add_day("did:plc:carol", "2024-01-05", 3);
    // Day two: retrieval present but only 2 engagements, below the default 3.
    fx.add_day("did:plc:carol", "2024-01-06", 2);

    let reqs = RequirementSet::default_set();
    run(
        &fx.store,
        &fx.source(),
        &reqs,
        zone(),
        day(7),
        &RunOptions::default(),
    )
    .expect("run succeeds");

    let rows = fx.rows("did:plc:carol");
    assert!(rows[0].is_active);
    assert!(!rows[1].is_active, "engagement threshold not met");
    assert_eq!(rows[1].retrieval_count, 1);
    assert_eq!(rows[1].engagement_count, 2);
    assert_eq!(rows[1].skip_streak, 1);
}

#[test]
fn skip_span_violation_survives_recovery() {
    let fx = Fixture::new(&["did:plc:dora"]);
    // Anchor day active, then four silent days (past max_skip_span = 3),
    // then four active days.
    fx.add_day("did:plc:dora", "2024-01-05", 3);
    for d in 10..14 {
        fx.add_day("did:plc:dora", &format!("2024-01-{d:02}"), 3);
    }

    let reqs = RequirementSet::default_set();
    run(
        &fx.store,
        &fx.source(),
        &reqs,
        zone(),
        day(14),
        &RunOptions::default(),
    )
    .expect("run succeeds");

    let rows = fx.rows("did:plc:dora");
    // Jan 9 is the fourth consecutive skip; every later row stays flagged
    // even though Jan 10 resets the streak.
    assert!(rows.iter().take(4).all(|r| !r.window_violation));
    assert!(rows.iter().skip(4).all(|r| r.window_violation));
    let last = rows.last().expect("rows exist");
    assert_eq!(last.skip_streak, 0);

    let summary = snapshot::window_summary(&fx.store, "did:plc:dora", "default")
        .expect("summary query")
        .expect("summary exists");
    assert!(
        summary.window_violation,
        "a violated window must not read as clean after recovery"
    );
}

#[test]
fn anchor_persists_across_runs() {
    let fx = Fixture::new(&["did:plc:alice"]);
    fx.add_day("did:plc:alice", "2024-01-05", 3);

    let reqs = RequirementSet::default_set();
    run(
        &fx.store,
        &fx.source(),
        &reqs,
        zone(),
        day(6),
        &RunOptions::default(),
    )
    .expect("first run");

    let anchor = roster::get_participant(&fx.store, "did:plc:alice")
        .expect("lookup")
        .expect("exists")
        .anchor_day;
    assert_eq!(anchor, Some(day(5)));

    // A backfilled earlier event must not move the anchor.
    fx.add_day("did:plc:alice", "2024-01-02", 3);
    run(
        &fx.store,
        &fx.source(),
        &reqs,
        zone(),
        day(7),
        &RunOptions::default(),
    )
    .expect("second run");

    let anchor = roster::get_participant(&fx.store, "did:plc:alice")
        .expect("lookup")
        .expect("exists")
        .anchor_day;
    assert_eq!(anchor, Some(day(5)), "anchor is fixed once stored");
    assert!(
        fx.rows("did:plc:alice")
            .iter()
            .all(|r| r.study_day >= day(5))
    );
}

#[test]
fn catch_up_after_gap_matches_uninterrupted_run() {
    let fx = Fixture::new(&["did:plc:alice", "did:plc:mirror"]);
    for d in 5..12 {
        let date = format!("2024-01-{d:02}");
        fx.add_day("did:plc:alice", &date, 3);
        fx.add_day("did:plc:mirror", &date, 3);
    }

    let reqs = RequirementSet::default_set();
    // alice: two runs with a gap. mirror: one uninterrupted run.
    let alice_only = RunOptions {
        user_filter: Some("did:plc:alice".to_string()),
        ..RunOptions::default()
    };
    run(&fx.store, &fx.source(), &reqs, zone(), day(8), &alice_only).expect("early run");
    run(&fx.store, &fx.source(), &reqs, zone(), day(12), &alice_only).expect("catch-up run");

    let mirror_only = RunOptions {
        user_filter: Some("did:plc:mirror".to_string()),
        ..RunOptions::default()
    };
    run(&fx.store, &fx.source(), &reqs, zone(), day(12), &mirror_only).expect("mirror run");

    let alice: Vec<_> = fx
        .rows("did:plc:alice")
        .into_iter()
        .map(|r| (r.study_day, r.day_index, r.cumulative_active, r.on_track))
        .collect();
    let mirror: Vec<_> = fx
        .rows("did:plc:mirror")
        .into_iter()
        .map(|r| (r.study_day, r.day_index, r.cumulative_active, r.on_track))
        .collect();
    assert_eq!(alice, mirror, "catch-up must converge on the same state");
}

#[test]
fn matched_scope_changes_the_classification() {
    let fx = Fixture::new(&["did:plc:alice"]);
    let conn = fx.events();
    conn.execute(
        "INSERT INTO feed_requests (requester_did, timestamp) VALUES (?1, ?2)",
        params!["did:plc:alice", "2024-01-05T12:00:00+00:00"],
    )
    .expect("insert retrieval");
    // Three engagements, only one provenance-verified.
    for (minute, matched) in [(1, 1), (2, 0), (3, 0)] {
        conn.execute(
            "INSERT INTO engagements (did_engagement, engagement_type, matched, timestamp) \
             VALUES (?1, 'like', ?2, ?3)",
            params![
                "did:plc:alice",
                matched,
                format!("2024-01-05T12:0{minute}:00+00:00")
            ],
        )
        .expect("insert engagement");
    }

    let mut reqs = RequirementSet::default_set();
    reqs.scope = stride_core::requirements::EngagementScope::Matched;
    run(
        &fx.store,
        &fx.source(),
        &reqs,
        zone(),
        day(6),
        &RunOptions::default(),
    )
    .expect("run succeeds");

    let rows = fx.rows("did:plc:alice");
    assert_eq!(rows[0].engagement_count, 1);
    assert!(!rows[0].is_active, "one matched engagement is below the threshold");
}
