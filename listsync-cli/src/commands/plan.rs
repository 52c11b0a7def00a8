//! `listsync plan`: a dry run that lists every mutation it would apply.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use listsync_engine::report::MutationRecord;
use listsync_engine::Direction;

use super::{announce, execute, exit_code, load_valid_config, DirectionArgs, GlobalArgs};

/// Arguments for `listsync plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub direction: DirectionArgs,
}

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "direction")]
    direction: &'static str,
    #[tabled(rename = "list")]
    list: String,
    #[tabled(rename = "mutation")]
    kind: String,
    #[tabled(rename = "contact")]
    contact: String,
    #[tabled(rename = "target")]
    target: String,
}

impl From<&MutationRecord> for PlanRow {
    fn from(record: &MutationRecord) -> Self {
        PlanRow {
            direction: match record.direction {
                Direction::Forward => "forward",
                Direction::Reverse => "reverse",
            },
            list: record.list.as_ref().map(|l| l.to_string()).unwrap_or_default(),
            kind: record.mutation.kind().to_string(),
            contact: record
                .mutation
                .contact()
                .map(|c| c.to_string())
                .unwrap_or_default(),
            target: record.mutation.target(),
        }
    }
}

impl PlanArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<ExitCode> {
        let config = load_valid_config(&global.config)?;
        let outcome = execute(&config, self.direction.options(true))?;

        let rows: Vec<PlanRow> = outcome.report.mutations.iter().map(PlanRow::from).collect();
        if rows.is_empty() && outcome.report.aborted.is_none() {
            println!("{}", "Nothing to do: both platforms are in sync.".green());
        } else if !rows.is_empty() {
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
        announce(&outcome);
        Ok(exit_code(&outcome.report))
    }
}
