//! Requirement sets: the named threshold bundles each snapshot is computed
//! under.
//!
//! A requirement set is an explicit value object passed into every evaluation
//! call; nothing in the engine reads thresholds from ambient state. Sets are
//! declared in `stride.toml` as a `defaults` table plus named per-label
//! overrides, and a label's effective set is the defaults with the label's
//! table merged on top.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which engagement events count toward the daily engagement threshold.
///
/// The verification join behind `Matched` is deployment policy; the engine
/// only threads the choice through to the event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementScope {
    /// Every engagement event in range counts.
    Any,
    /// Only events flagged provenance-verified count.
    Matched,
}

impl EngagementScope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Matched => "matched",
        }
    }
}

/// Effective thresholds for one requirement-set label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequirementSet {
    pub label: String,
    /// Window length in study days.
    pub window_days: u32,
    /// Active days required within the window.
    pub min_active_days: u32,
    /// Minimum retrieval events for a day to count as active.
    pub min_retrievals: u32,
    /// Minimum engagement events for a day to count as active.
    pub min_engagement: u32,
    /// Longest tolerated run of consecutive skipped days.
    pub max_skip_span: u32,
    /// Most skipped days tolerated across the whole window.
    pub max_skip_days: u32,
    /// Hour of local wall-clock time at which a study day starts.
    pub cutoff_hour: u32,
    pub scope: EngagementScope,
}

impl RequirementSet {
    /// The built-in `default` label with stock thresholds.
    #[must_use]
    pub fn default_set() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            window_days: DEFAULT_WINDOW_DAYS,
            min_active_days: DEFAULT_MIN_ACTIVE_DAYS,
            min_retrievals: DEFAULT_MIN_RETRIEVALS,
            min_engagement: DEFAULT_MIN_ENGAGEMENT,
            max_skip_span: DEFAULT_MAX_SKIP_SPAN,
            max_skip_days: DEFAULT_MAX_SKIP_DAYS,
            cutoff_hour: DEFAULT_CUTOFF_HOUR,
            scope: EngagementScope::Any,
        }
    }

    /// Validate threshold sanity before any participant is processed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCutoffHour`] when the cutoff hour is
    /// outside `0..=23` and [`ConfigError::ZeroWindowLength`] when the window
    /// is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cutoff_hour > 23 {
            return Err(ConfigError::InvalidCutoffHour {
                hour: self.cutoff_hour,
            });
        }
        if self.window_days == 0 {
            return Err(ConfigError::ZeroWindowLength);
        }
        Ok(())
    }
}

/// One partially specified requirement table from `stride.toml`.
///
/// Every field is optional so a label only has to name the thresholds it
/// overrides; the rest come from the defaults table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequirementTable {
    pub window_days: Option<u32>,
    pub min_active_days: Option<u32>,
    pub min_retrievals: Option<u32>,
    pub min_engagement: Option<u32>,
    pub max_skip_span: Option<u32>,
    pub max_skip_days: Option<u32>,
    pub cutoff_hour: Option<u32>,
    pub scope: Option<EngagementScope>,
}

impl RequirementTable {
    /// Merge `overrides` on top of `self`, field by field.
    #[must_use]
    pub fn merged_with(&self, overrides: &Self) -> Self {
        Self {
            window_days: overrides.window_days.or(self.window_days),
            min_active_days: overrides.min_active_days.or(self.min_active_days),
            min_retrievals: overrides.min_retrievals.or(self.min_retrievals),
            min_engagement: overrides.min_engagement.or(self.min_engagement),
            max_skip_span: overrides.max_skip_span.or(self.max_skip_span),
            max_skip_days: overrides.max_skip_days.or(self.max_skip_days),
            cutoff_hour: overrides.cutoff_hour.or(self.cutoff_hour),
            scope: overrides.scope.or(self.scope),
        }
    }

    /// Resolve the merged table into a validated [`RequirementSet`].
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the resolved thresholds fail
    /// [`RequirementSet::validate`].
    pub fn resolve(&self, label: &str) -> Result<RequirementSet, ConfigError> {
        let set = RequirementSet {
            label: label.to_string(),
            window_days: self.window_days.unwrap_or(DEFAULT_WINDOW_DAYS),
            min_active_days: self.min_active_days.unwrap_or(DEFAULT_MIN_ACTIVE_DAYS),
            min_retrievals: self.min_retrievals.unwrap_or(DEFAULT_MIN_RETRIEVALS),
            min_engagement: self.min_engagement.unwrap_or(DEFAULT_MIN_ENGAGEMENT),
            max_skip_span: self.max_skip_span.unwrap_or(DEFAULT_MAX_SKIP_SPAN),
            max_skip_days: self.max_skip_days.unwrap_or(DEFAULT_MAX_SKIP_DAYS),
            cutoff_hour: self.cutoff_hour.unwrap_or(DEFAULT_CUTOFF_HOUR),
            scope: self.scope.unwrap_or(EngagementScope::Any),
        };
        set.validate()?;
        Ok(set)
    }
}

/// The label used when a deployment declares no named sets.
pub const DEFAULT_LABEL: &str = "default";

pub const DEFAULT_WINDOW_DAYS: u32 = 14;
pub const DEFAULT_MIN_ACTIVE_DAYS: u32 = 10;
pub const DEFAULT_MIN_RETRIEVALS: u32 = 1;
pub const DEFAULT_MIN_ENGAGEMENT: u32 = 3;
pub const DEFAULT_MAX_SKIP_SPAN: u32 = 3;
pub const DEFAULT_MAX_SKIP_DAYS: u32 = 4;
pub const DEFAULT_CUTOFF_HOUR: u32 = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_resolves_to_defaults() {
        let set = RequirementTable::default()
            .resolve("pilot")
            .expect("defaults should validate");
        assert_eq!(set.label, "pilot");
        assert_eq!(set.window_days, 14);
        assert_eq!(set.min_active_days, 10);
        assert_eq!(set.min_retrievals, 1);
        assert_eq!(set.min_engagement, 3);
        assert_eq!(set.cutoff_hour, 5);
        assert_eq!(set.scope, EngagementScope::Any);
    }

    #[test]
    fn merge_prefers_override_fields() {
        let defaults = RequirementTable {
            window_days: Some(14),
            min_active_days: Some(10),
            ..RequirementTable::default()
        };
        let overrides = RequirementTable {
            min_active_days: Some(8),
            scope: Some(EngagementScope::Matched),
            ..RequirementTable::default()
        };

        let merged = defaults.merged_with(&overrides);
        assert_eq!(merged.window_days, Some(14));
        assert_eq!(merged.min_active_days, Some(8));
        assert_eq!(merged.scope, Some(EngagementScope::Matched));
    }

    #[test]
    fn cutoff_hour_out_of_range_fails_fast() {
        let table = RequirementTable {
            cutoff_hour: Some(24),
            ..RequirementTable::default()
        };
        let err = table.resolve("pilot").expect_err("24 is not a valid hour");
        assert_eq!(err, ConfigError::InvalidCutoffHour { hour: 24 });
    }

    #[test]
    fn zero_window_fails_fast() {
        let table = RequirementTable {
            window_days: Some(0),
            ..RequirementTable::default()
        };
        let err = table.resolve("pilot").expect_err("empty window is invalid");
        assert_eq!(err, ConfigError::ZeroWindowLength);
    }

    #[test]
    fn scope_parses_from_toml() {
        let table: RequirementTable =
            toml::from_str("scope = \"matched\"").expect("scope should parse");
        assert_eq!(table.scope, Some(EngagementScope::Matched));
    }

    #[test]
    fn negative_threshold_is_rejected_at_parse_time() {
        let err = toml::from_str::<RequirementTable>("min_engagement = -1");
        assert!(err.is_err(), "negative thresholds must not parse");
    }
}
