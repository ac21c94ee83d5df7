//! `stride today` — live preview of the current, still open study day.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use stride_core::error::NoAnchor;
use stride_core::requirements::DEFAULT_LABEL;
use stride_core::run::preview_today;

use crate::cmd::{open_deployment, open_source};
use crate::output::{CliError, OutputMode, pretty_kv, render, render_error};

/// Arguments for `stride today`.
#[derive(Args, Debug)]
pub struct TodayArgs {
    /// Participant DID.
    pub user_did: String,

    /// Requirement-set label to preview under.
    #[arg(long, default_value = DEFAULT_LABEL)]
    pub label: String,
}

/// Execute `stride today`.
///
/// # Errors
///
/// Returns an error when the databases cannot be read or the participant
/// has no window yet.
pub fn run_today(args: &TodayArgs, output: OutputMode, root: &Path) -> Result<()> {
    let deployment = open_deployment(root)?;
    let source = open_source(root, &deployment.config)?;
    let zone = deployment.config.reference_zone()?;
    let reqs = deployment.config.requirement_set(&args.label)?;

    let preview = match preview_today(
        &deployment.store,
        &source,
        &reqs,
        zone,
        Utc::now(),
        &args.user_did,
    ) {
        Ok(preview) => preview,
        Err(err) if err.downcast_ref::<NoAnchor>().is_some() => {
            render_error(
                output,
                &CliError::with_details(
                    err.to_string(),
                    "the window anchors on the first retrieval; run `stride aggregate` once \
                     events exist",
                    "no_anchor",
                ),
            )?;
            anyhow::bail!("no anchor");
        }
        Err(err) => return Err(err),
    };

    render(output, &preview, |preview, w| {
        pretty_kv(w, "study day", preview.study_day.to_string())?;
        pretty_kv(w, "retrievals", preview.retrieval_count.to_string())?;
        pretty_kv(w, "engagements", preview.engagement_count.to_string())?;
        pretty_kv(
            w,
            "would be active",
            if preview.would_be_active { "yes" } else { "no" },
        )?;
        pretty_kv(
            w,
            "on track",
            if preview.projection.on_track { "yes" } else { "no" },
        )?;
        if !preview.engagement_breakdown.is_empty() {
            writeln!(w, "breakdown:")?;
            for (kind, count) in &preview.engagement_breakdown {
                writeln!(w, "  {kind:<12} {count}")?;
            }
        }
        Ok(())
    })
}
