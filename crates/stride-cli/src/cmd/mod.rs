//! Command handlers for the `stride` binary.

pub mod aggregate;
pub mod completions;
pub mod enroll;
pub mod migrate;
pub mod status;
pub mod today;
pub mod window;

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use stride_core::config::{StrideConfig, load_config};
use stride_core::source::SqliteEventSource;
use stride_core::store::open_store;

/// Everything a command needs to talk to the deployment: parsed config plus
/// an open store connection.
pub struct Deployment {
    pub config: StrideConfig,
    pub store: stride_core::store::Connection,
}

/// Load config and open (and migrate) the snapshot store under `root`.
///
/// # Errors
///
/// Returns an error when the config cannot be parsed or the store cannot be
/// opened.
pub fn open_deployment(root: &Path) -> Result<Deployment> {
    let config = load_config(root).context("load stride.toml")?;
    let store = open_store(&root.join(&config.paths.store_db))?;
    Ok(Deployment { config, store })
}

/// Open the external event database read-only with the configured deadline.
///
/// # Errors
///
/// Returns an error when the database cannot be opened.
pub fn open_source(root: &Path, config: &StrideConfig) -> Result<SqliteEventSource> {
    let path = root.join(&config.paths.events_db);
    let timeout = Duration::from_millis(config.study.source_timeout_ms);
    SqliteEventSource::open(&path, timeout)
        .with_context(|| format!("open event database {}", path.display()))
}
