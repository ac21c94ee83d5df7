use std::fmt;

use thiserror::Error;

/// Configuration problems detected at requirement-set load time.
///
/// All of these are fatal for a run: nothing is processed until the
/// configuration is valid.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cutoff hour must be within 0..=23 (got {hour})")]
    InvalidCutoffHour { hour: u32 },

    #[error("window length must be at least one day")]
    ZeroWindowLength,

    #[error("requirement set {label:?} not found (available: {available})")]
    UnknownLabel { label: String, available: String },

    #[error("unknown reference time zone {zone:?}")]
    UnknownZone { zone: String },
}

/// Failures reading from the external event source.
///
/// These are recovered per participant: the run records them and moves on.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("event source query exceeded the {timeout_ms}ms deadline")]
    Timeout { timeout_ms: u64 },

    #[error("event source query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

/// Failures reading or writing the snapshot store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot store query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("malformed value in column {column}: {value:?}")]
    Malformed { column: &'static str, value: String },
}

/// A participant has produced no qualifying event yet, so no window exists.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("participant {user_did:?} has no anchor day yet")]
pub struct NoAnchor {
    pub user_did: String,
}

/// Machine-readable error codes surfaced in run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidConfig,
    SourceTimeout,
    SourceQueryFailed,
    StoreWriteFailed,
    StoreReadFailed,
    MalformedCounts,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidConfig => "E1001",
            Self::SourceTimeout => "E3001",
            Self::SourceQueryFailed => "E3002",
            Self::StoreWriteFailed => "E5001",
            Self::StoreReadFailed => "E5002",
            Self::MalformedCounts => "E2001",
        }
    }

    /// Optional remediation hint surfaced under run-report error lines.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::InvalidConfig => Some("Fix thresholds in stride.toml and rerun."),
            Self::SourceTimeout => {
                Some("Check event database load; the participant is retried on the next run.")
            }
            Self::SourceQueryFailed => Some("Verify the event database path and schema."),
            Self::StoreWriteFailed => Some("Check disk space and write permissions."),
            Self::StoreReadFailed => Some("Run `stride migrate` to repair the store schema."),
            Self::MalformedCounts => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl From<&SourceError> for ErrorCode {
    fn from(err: &SourceError) -> Self {
        match err {
            SourceError::Timeout { .. } => Self::SourceTimeout,
            SourceError::Query(_) => Self::SourceQueryFailed,
        }
    }
}
