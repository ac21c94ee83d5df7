#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use output::OutputMode;
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "stride: study-compliance aggregation engine",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding stride.toml and the databases (default: cwd).
    #[arg(short = 'C', long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Derive the output mode from flags.
    fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Finalize complete study days for eligible participants",
        long_about = "Walk every eligible participant's window and write one snapshot row per \
                      complete study day, skipping days already stored.",
        after_help = "EXAMPLES:\n    # Catch up to today\n    stride aggregate\n\n    # Recompute one participant from scratch\n    stride aggregate --user did:plc:abc --force\n\n    # Emit machine-readable output\n    stride aggregate --json"
    )]
    Aggregate(cmd::aggregate::AggregateArgs),

    #[command(
        about = "Add a participant to the roster",
        long_about = "Enroll a participant as eligible, or update the status of an existing one.",
        after_help = "EXAMPLES:\n    # Enroll\n    stride enroll did:plc:abc\n\n    # Pause without losing stored snapshots\n    stride enroll did:plc:abc --status paused"
    )]
    Enroll(cmd::enroll::EnrollArgs),

    #[command(
        about = "Show a participant's stored window summary",
        after_help = "EXAMPLES:\n    # One participant\n    stride status did:plc:abc\n\n    # Every eligible participant\n    stride status"
    )]
    Status(cmd::status::StatusArgs),

    #[command(
        about = "Show a participant's day-by-day stored activity",
        after_help = "EXAMPLES:\n    stride window did:plc:abc\n    stride window did:plc:abc --json"
    )]
    Window(cmd::window::WindowArgs),

    #[command(
        about = "Preview the current (still open) study day",
        long_about = "Compute live counts for the current study day without persisting anything. \
                      The classification is a preview; the day is finalized by the next aggregate \
                      run after it ends.",
        after_help = "EXAMPLES:\n    stride today did:plc:abc"
    )]
    Today(cmd::today::TodayArgs),

    #[command(
        about = "Create or upgrade the snapshot store schema",
        after_help = "EXAMPLES:\n    stride migrate"
    )]
    Migrate,

    #[command(about = "Generate shell completion scripts")]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("STRIDE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "stride=debug,info"
        } else {
            "stride=info,warn"
        })
    });

    let format = env::var("STRIDE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry.with(fmt::layer().json().with_ansi(false)).init();
        }
        _ => {
            registry.with(fmt::layer().compact()).init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let root = match cli.dir {
        Some(ref dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let output = cli.output_mode();

    match cli.command {
        Commands::Aggregate(ref args) => cmd::aggregate::run_aggregate(args, output, &root),
        Commands::Enroll(ref args) => cmd::enroll::run_enroll(args, output, &root),
        Commands::Status(ref args) => cmd::status::run_status(args, output, &root),
        Commands::Window(ref args) => cmd::window::run_window(args, output, &root),
        Commands::Today(ref args) => cmd::today::run_today(args, output, &root),
        Commands::Migrate => cmd::migrate::run_migrate(output, &root),
        Commands::Completions(args) => {
            let mut command = Cli::command();
            cmd::completions::run_completions(args.shell, &mut command)
        }
    }
}
