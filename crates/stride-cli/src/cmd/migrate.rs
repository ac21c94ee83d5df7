//! `stride migrate` — create or upgrade the snapshot store schema.

use std::path::Path;

use anyhow::Result;
use stride_core::store::migrations;

use crate::cmd::open_deployment;
use crate::output::{OutputMode, render_success};

/// Execute `stride migrate`.
///
/// Opening the store already applies pending migrations; this command exists
/// so deployments can upgrade explicitly before the next scheduled run.
///
/// # Errors
///
/// Returns an error when the store cannot be opened or migrated.
pub fn run_migrate(output: OutputMode, root: &Path) -> Result<()> {
    let deployment = open_deployment(root)?;
    let version = migrations::current_schema_version(&deployment.store)?;
    render_success(output, &format!("store is at schema version {version}"))
}
