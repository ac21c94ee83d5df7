//! Deployment configuration: database paths, the reference time zone, and
//! requirement-set tables, loaded from an optional `stride.toml`.

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::requirements::{DEFAULT_LABEL, RequirementSet, RequirementTable};

/// Deployment configuration loaded from `stride.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StrideConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub study: StudyConfig,
    #[serde(default)]
    pub requirements: RequirementsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Snapshot store database (created on first run).
    #[serde(default = "default_store_db")]
    pub store_db: PathBuf,
    /// External event database, read-only.
    #[serde(default = "default_events_db")]
    pub events_db: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            store_db: default_store_db(),
            events_db: default_events_db(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StudyConfig {
    /// IANA zone name in which study-day boundaries are expressed.
    #[serde(default = "default_reference_zone")]
    pub reference_zone: String,
    /// Deadline for a single event-source query, in milliseconds.
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            reference_zone: default_reference_zone(),
            source_timeout_ms: default_source_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RequirementsConfig {
    #[serde(default)]
    pub defaults: RequirementTable,
    #[serde(default)]
    pub sets: BTreeMap<String, RequirementTable>,
}

impl StrideConfig {
    /// Resolve the effective requirement set for a label: the defaults table
    /// with the label's overrides merged on top, validated fail-fast.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownLabel`] for labels not declared in
    /// `[requirements.sets]`, or the validation error for bad thresholds.
    pub fn requirement_set(&self, label: &str) -> Result<RequirementSet, ConfigError> {
        // "default" always resolves, even with no [requirements.sets] at all.
        if label == DEFAULT_LABEL && !self.requirements.sets.contains_key(label) {
            return self.requirements.defaults.resolve(label);
        }
        let Some(overrides) = self.requirements.sets.get(label) else {
            let available = self
                .requirements
                .sets
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ConfigError::UnknownLabel {
                label: label.to_string(),
                available: if available.is_empty() {
                    "none".to_string()
                } else {
                    available
                },
            });
        };
        self.requirements
            .defaults
            .merged_with(overrides)
            .resolve(label)
    }

    /// Parse the configured reference zone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownZone`] when the name is not an IANA
    /// zone identifier.
    pub fn reference_zone(&self) -> Result<Tz, ConfigError> {
        self.study
            .reference_zone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownZone {
                zone: self.study.reference_zone.clone(),
            })
    }
}

/// Load `stride.toml` from the given directory, falling back to defaults
/// when the file is absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(root: &Path) -> Result<StrideConfig> {
    let path = root.join("stride.toml");
    if !path.exists() {
        return Ok(StrideConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<StrideConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

fn default_store_db() -> PathBuf {
    PathBuf::from("stride.db")
}

fn default_events_db() -> PathBuf {
    PathBuf::from("compliance.db")
}

fn default_reference_zone() -> String {
    "Europe/Amsterdam".to_string()
}

const fn default_source_timeout_ms() -> u64 {
    5_000
}
