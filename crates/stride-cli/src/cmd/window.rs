//! `stride window` — day-by-day stored activity for one participant.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use stride_core::requirements::DEFAULT_LABEL;
use stride_core::store::snapshot::{self, DayActivity};

use crate::cmd::open_deployment;
use crate::output::{OutputMode, render};

/// Arguments for `stride window`.
#[derive(Args, Debug)]
pub struct WindowArgs {
    /// Participant DID.
    pub user_did: String,

    /// Requirement-set label the snapshots were computed under.
    #[arg(long, default_value = DEFAULT_LABEL)]
    pub label: String,
}

/// Report payload for `stride window`.
#[derive(Debug, Serialize)]
struct WindowReport {
    user_did: String,
    label: String,
    days: Vec<DayRow>,
}

#[derive(Debug, Serialize)]
struct DayRow {
    study_day: chrono::NaiveDate,
    day_index: u32,
    retrievals: u32,
    engagements: u32,
    active: bool,
}

impl From<DayActivity> for DayRow {
    fn from(activity: DayActivity) -> Self {
        Self {
            study_day: activity.study_day,
            day_index: activity.day_index,
            retrievals: activity.retrieval_count,
            engagements: activity.engagement_count,
            active: activity.is_active,
        }
    }
}

/// Execute `stride window`.
///
/// # Errors
///
/// Returns an error when the store cannot be read.
pub fn run_window(args: &WindowArgs, output: OutputMode, root: &Path) -> Result<()> {
    let deployment = open_deployment(root)?;
    let days = snapshot::day_activity(&deployment.store, &args.user_did, &args.label)?;

    let report = WindowReport {
        user_did: args.user_did.clone(),
        label: args.label.clone(),
        days: days.into_iter().map(DayRow::from).collect(),
    };

    render(output, &report, |report, w| {
        if report.days.is_empty() {
            writeln!(w, "{}: no days stored yet", report.user_did)?;
            return Ok(());
        }
        writeln!(w, "day  date        retrievals  engagements  active")?;
        for day in &report.days {
            writeln!(
                w,
                "{:>3}  {}  {:>10}  {:>11}  {}",
                day.day_index,
                day.study_day,
                day.retrievals,
                day.engagements,
                if day.active { "yes" } else { "no" },
            )?;
        }
        Ok(())
    })
}
