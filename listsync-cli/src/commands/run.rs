//! `listsync run`: one reconciliation pass.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use super::{announce, execute, exit_code, load_valid_config, DirectionArgs, GlobalArgs};

/// Arguments for `listsync run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Read both platforms and report, but write nothing.
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub direction: DirectionArgs,
}

impl RunArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<ExitCode> {
        let config = load_valid_config(&global.config)?;
        let outcome = execute(&config, self.direction.options(self.dry_run))?;
        announce(&outcome);
        Ok(exit_code(&outcome.report))
    }
}
