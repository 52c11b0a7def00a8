//! listsync: reconcile CRM lists with email audience tags, both ways.
//!
//! # Usage
//!
//! ```text
//! listsync run [--dry-run] [--forward-only | --reverse-only]
//! listsync plan [--forward-only | --reverse-only]
//! listsync status [--json]
//! listsync validate
//! ```
//!
//! Every command accepts `--config <path>` (default `./listsync.yaml`) and
//! `--verbose`. Credentials come from `CRM_TOKEN`, `AUDIENCE_API_KEY`,
//! `AUDIENCE_LIST_ID` and, optionally, `AUDIENCE_DC` and `NOTIFY_WEBHOOK_URL`.

mod clients;
mod commands;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    plan::PlanArgs, run::RunArgs, status::StatusArgs, validate::ValidateArgs, GlobalArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "listsync",
    version,
    about = "Reconcile CRM lists with email audience tags",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one reconciliation pass.
    Run(RunArgs),

    /// Show the mutations a pass would apply, without applying them.
    Plan(PlanArgs),

    /// Show the name map, recent renames and the last run report.
    Status(StatusArgs),

    /// Check the configuration file without touching either platform.
    Validate(ValidateArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

/// `RUST_LOG` filters (default `info`); `--verbose` forces `debug`.
fn init_logging(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if verbose {
        builder.filter_level(tracing::LevelFilter::Debug);
    }
    builder.format_timestamp_secs().init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);
    match cli.command {
        Commands::Run(args) => args.run(&cli.global),
        Commands::Plan(args) => args.run(&cli.global),
        Commands::Status(args) => args.run(&cli.global).map(|()| ExitCode::SUCCESS),
        Commands::Validate(args) => args.run(&cli.global).map(|()| ExitCode::SUCCESS),
    }
}
