//! `stride enroll` — roster management.

use std::path::Path;

use anyhow::Result;
use clap::{Args, ValueEnum};
use stride_core::requirements::DEFAULT_LABEL;
use stride_core::store::roster::{self, ParticipantStatus};

use crate::cmd::open_deployment;
use crate::output::{OutputMode, render_success};

/// Roster status as a CLI flag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    Eligible,
    Paused,
    Withdrawn,
}

impl From<StatusArg> for ParticipantStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Eligible => Self::Eligible,
            StatusArg::Paused => Self::Paused,
            StatusArg::Withdrawn => Self::Withdrawn,
        }
    }
}

/// Arguments for `stride enroll`.
#[derive(Args, Debug)]
pub struct EnrollArgs {
    /// Participant DID.
    pub user_did: String,

    /// Study label recorded on the roster row.
    #[arg(long, default_value = DEFAULT_LABEL)]
    pub label: String,

    /// Roster status to set. Re-running enroll on an existing participant
    /// only updates the status.
    #[arg(long, value_enum, default_value_t = StatusArg::Eligible)]
    pub status: StatusArg,

    /// Notification address stored on the roster row, passed through to the
    /// mail subsystem.
    #[arg(long)]
    pub contact: Option<String>,
}

/// Execute `stride enroll`.
///
/// # Errors
///
/// Returns an error when the store cannot be opened or written.
pub fn run_enroll(args: &EnrollArgs, output: OutputMode, root: &Path) -> Result<()> {
    let deployment = open_deployment(root)?;
    roster::enroll(
        &deployment.store,
        &args.user_did,
        &args.label,
        args.contact.as_deref(),
    )?;
    roster::set_status(&deployment.store, &args.user_did, args.status.into())?;

    let status: ParticipantStatus = args.status.into();
    render_success(
        output,
        &format!("{} is {}", args.user_did, status.as_str()),
    )
}
