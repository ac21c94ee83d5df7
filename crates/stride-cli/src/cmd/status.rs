//! `stride status` — stored window summaries.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use clap::Args;
use chrono::NaiveDate;
use serde::Serialize;
use stride_core::requirements::DEFAULT_LABEL;
use stride_core::store::roster;
use stride_core::store::snapshot::{self, DailyActivityCounts, WindowSummary};

use crate::cmd::open_deployment;
use crate::output::{CliError, OutputMode, render, render_error};

/// Arguments for `stride status`.
#[derive(Args, Debug, Default)]
pub struct StatusArgs {
    /// Participant DID; omit to summarize every eligible participant.
    pub user_did: Option<String>,

    /// Requirement-set label the snapshots were computed under.
    #[arg(long, default_value = DEFAULT_LABEL)]
    pub label: String,

    /// Also report cohort-wide active/inactive totals for this study day.
    #[arg(long, value_name = "DATE")]
    pub day: Option<NaiveDate>,
}

/// Report payload for `stride status`.
#[derive(Debug, Serialize)]
struct StatusReport {
    summaries: Vec<WindowSummary>,
    /// Eligible participants with no stored days yet.
    pending: Vec<String>,
    /// Cohort totals for the requested day, when `--day` was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    day_counts: Option<DailyActivityCounts>,
}

/// Execute `stride status`.
///
/// # Errors
///
/// Returns an error when the store cannot be read, or when a named
/// participant does not exist.
pub fn run_status(args: &StatusArgs, output: OutputMode, root: &Path) -> Result<()> {
    let deployment = open_deployment(root)?;

    let dids: Vec<String> = match &args.user_did {
        Some(did) => {
            if roster::get_participant(&deployment.store, did)?.is_none() {
                render_error(
                    output,
                    &CliError::with_details(
                        format!("participant {did:?} is not enrolled"),
                        "run `stride enroll <did>` first",
                        "not_enrolled",
                    ),
                )?;
                anyhow::bail!("participant not enrolled");
            }
            vec![did.clone()]
        }
        None => roster::eligible_participants(&deployment.store)?
            .into_iter()
            .map(|p| p.user_did)
            .collect(),
    };

    let mut report = StatusReport {
        summaries: Vec::new(),
        pending: Vec::new(),
        day_counts: None,
    };
    for did in dids {
        match snapshot::window_summary(&deployment.store, &did, &args.label)? {
            Some(summary) => report.summaries.push(summary),
            None => report.pending.push(did),
        }
    }
    if let Some(day) = args.day {
        report.day_counts = Some(snapshot::daily_activity_counts(
            &deployment.store,
            &args.label,
            day,
        )?);
    }

    render(output, &report, |report, w| {
        for summary in &report.summaries {
            writeln!(
                w,
                "{}  {}/{} active  {} skipped  {}{}",
                summary.user_did,
                summary.active_days,
                summary.days_recorded,
                summary.skipped_days,
                if summary.on_track { "on track" } else { "off track" },
                if summary.window_violation {
                    "  (skip budget exceeded)"
                } else {
                    ""
                },
            )?;
        }
        for did in &report.pending {
            writeln!(w, "{did}  no days stored yet")?;
        }
        if let Some(counts) = &report.day_counts {
            writeln!(
                w,
                "{}: {} active, {} inactive",
                counts.study_day, counts.active, counts.inactive,
            )?;
        }
        Ok(())
    })
}
