//! `listsync validate`: check the config file offline.

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;

use super::{load_config, GlobalArgs};

/// Arguments for `listsync validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = load_config(&global.config)?;
        let report = config.validate();

        for error in &report.errors {
            println!("{} {error}", "error:".red().bold());
        }
        for warning in &report.warnings {
            println!("{} {warning}", "warning:".yellow().bold());
        }
        if !report.is_ok() {
            bail!(
                "{} is invalid ({} error(s))",
                global.config.display(),
                report.errors.len()
            );
        }

        println!(
            "✓ {} is valid: {} forward list(s), reverse {}, {} warning(s)",
            global.config.display(),
            config.forward.lists.len(),
            if config.reverse.enabled { "enabled" } else { "disabled" },
            report.warnings.len()
        );
        Ok(())
    }
}
