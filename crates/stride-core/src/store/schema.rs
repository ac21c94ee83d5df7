//! Canonical SQLite schema for the snapshot store.
//!
//! The store is the durable result of aggregation and is rebuildable from
//! the event database:
//! - `participants` keeps roster status and each participant's anchor day
//! - `requirement_sets` records every requirement version a run evaluated
//!   against, append-only, so historical snapshots stay interpretable
//! - `daily_snapshots` holds one finalized row per participant per study day
//!   per requirement label
//! - `store_meta` tracks schema version and the instant of the last run

/// Migration v1: core tables plus store metadata.
pub const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS participants (
    user_did TEXT PRIMARY KEY CHECK (length(trim(user_did)) > 0),
    study_label TEXT NOT NULL CHECK (length(trim(study_label)) > 0),
    contact TEXT,
    status TEXT NOT NULL DEFAULT 'eligible'
        CHECK (status IN ('eligible', 'paused', 'withdrawn')),
    anchor_day TEXT CHECK (anchor_day IS NULL OR anchor_day GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]'),
    enrolled_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS requirement_sets (
    requirement_id INTEGER PRIMARY KEY AUTOINCREMENT,
    label TEXT NOT NULL,
    params_json TEXT NOT NULL,
    recorded_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    UNIQUE (label, params_json)
);

CREATE TABLE IF NOT EXISTS daily_snapshots (
    snapshot_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_did TEXT NOT NULL REFERENCES participants(user_did) ON DELETE CASCADE,
    study_day TEXT NOT NULL CHECK (study_day GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]'),
    requirement_label TEXT NOT NULL,
    day_index INTEGER NOT NULL CHECK (day_index >= 0),
    retrieval_count INTEGER NOT NULL CHECK (retrieval_count >= 0),
    engagement_count INTEGER NOT NULL CHECK (engagement_count >= 0),
    engagement_breakdown TEXT NOT NULL DEFAULT '{}',
    is_active INTEGER NOT NULL CHECK (is_active IN (0, 1)),
    cumulative_active INTEGER NOT NULL CHECK (cumulative_active >= 0),
    cumulative_skipped INTEGER NOT NULL CHECK (cumulative_skipped >= 0),
    skip_streak INTEGER NOT NULL CHECK (skip_streak >= 0),
    window_violation INTEGER NOT NULL CHECK (window_violation IN (0, 1)),
    on_track INTEGER NOT NULL CHECK (on_track IN (0, 1)),
    computed_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    UNIQUE (user_did, study_day, requirement_label)
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    last_run_at TEXT
);

INSERT INTO store_meta (id, schema_version, last_run_at)
VALUES (1, 1, NULL)
ON CONFLICT (id) DO NOTHING;
"#;

/// Migration v2: lookup indexes for the catch-up and reporting queries.
pub const MIGRATION_V2_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_snapshots_user_label_day
    ON daily_snapshots (user_did, requirement_label, study_day);

CREATE INDEX IF NOT EXISTS idx_snapshots_day
    ON daily_snapshots (study_day);

CREATE INDEX IF NOT EXISTS idx_participants_status
    ON participants (status);
"#;

/// Indexes that must exist after migrating to the latest version.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_snapshots_user_label_day",
    "idx_snapshots_day",
    "idx_participants_status",
];
