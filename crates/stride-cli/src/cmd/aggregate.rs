//! `stride aggregate` — the batch finalization run.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::Args;
use stride_core::day;
use stride_core::requirements::DEFAULT_LABEL;
use stride_core::run::{RunOptions, run};

use crate::cmd::{open_deployment, open_source};
use crate::output::{OutputMode, pretty_kv, render};

/// Arguments for `stride aggregate`.
#[derive(Args, Debug, Default)]
pub struct AggregateArgs {
    /// Requirement-set label to evaluate under.
    #[arg(long, default_value = DEFAULT_LABEL)]
    pub label: String,

    /// Restrict the run to one participant DID.
    #[arg(long)]
    pub user: Option<String>,

    /// Recompute and overwrite days that are already stored.
    #[arg(long)]
    pub force: bool,

    /// Evaluate as of this study day instead of today (YYYY-MM-DD).
    #[arg(long, value_name = "DATE")]
    pub as_of: Option<NaiveDate>,
}

/// Execute `stride aggregate`.
///
/// # Errors
///
/// Returns an error when configuration is invalid, the databases cannot be
/// opened, or the run aborts on a persistently failing store.
pub fn run_aggregate(args: &AggregateArgs, output: OutputMode, root: &Path) -> Result<()> {
    let deployment = open_deployment(root)?;
    let source = open_source(root, &deployment.config)?;
    let zone = deployment.config.reference_zone()?;
    let reqs = deployment.config.requirement_set(&args.label)?;

    let evaluation_day = match args.as_of {
        Some(day) => day,
        None => day::study_day_for(Utc::now(), reqs.cutoff_hour, zone)?,
    };

    let options = RunOptions {
        user_filter: args.user.clone(),
        force: args.force,
    };
    let report = run(
        &deployment.store,
        &source,
        &reqs,
        zone,
        evaluation_day,
        &options,
    )?;

    render(output, &report, |report, w| {
        pretty_kv(w, "evaluation day", report.evaluation_day.to_string())?;
        pretty_kv(w, "label", &report.requirement_label)?;
        pretty_kv(w, "processed", report.processed.to_string())?;
        pretty_kv(w, "days written", report.days_written.to_string())?;
        pretty_kv(w, "no anchor yet", report.skipped_no_anchor.to_string())?;
        pretty_kv(w, "errors", report.errors.len().to_string())?;
        for error in &report.errors {
            let day = error
                .study_day
                .map_or_else(|| "-".to_string(), |d| d.to_string());
            writeln!(
                w,
                "  {} {} [{}] {}",
                error.user_did,
                day,
                error.code.code(),
                error.message
            )?;
            if let Some(hint) = error.code.hint() {
                writeln!(w, "      hint: {hint}")?;
            }
        }
        Ok(())
    })
}
