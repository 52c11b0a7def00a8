//! `listsync status`: name map, recent renames and the last run.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use listsync_engine::history::{self, RenameEntry, RenameOutcome};
use listsync_engine::report::{self, RunReport};
use listsync_engine::name_map;

use super::{load_config, GlobalArgs};

const RECENT_RENAMES: usize = 10;

/// Arguments for `listsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = load_config(&global.config)?;
        let state_dir = config.state_dir()?;
        let status = build_status(&state_dir)?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status).context("failed to serialize status JSON")?
            );
        } else {
            print_status(&status);
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct Status {
    state_dir: String,
    lists: Vec<ListName>,
    /// Set when the name map exists but could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    name_map_error: Option<String>,
    renames: Vec<RenameEntry>,
    skipped_history_lines: usize,
    last_run: Option<LastRun>,
}

#[derive(Serialize, Tabled)]
struct ListName {
    #[tabled(rename = "list")]
    list: String,
    #[tabled(rename = "last known name")]
    name: String,
}

#[derive(Serialize)]
struct LastRun {
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    dry_run: bool,
    aborted: Option<String>,
    applied: usize,
    retried: usize,
    failed: usize,
    would_apply: usize,
    warnings: usize,
    failed_lists: usize,
    archival_ran: bool,
}

impl From<&RunReport> for LastRun {
    fn from(r: &RunReport) -> Self {
        LastRun {
            started_at: r.started_at,
            finished_at: r.finished_at,
            dry_run: r.dry_run,
            aborted: r.aborted.clone(),
            applied: r.totals.all.success,
            retried: r.totals.all.retried_success,
            failed: r.totals.all.permanent_failure,
            would_apply: r.totals.all.would_apply,
            warnings: r.totals.warnings,
            failed_lists: r.totals.failed_lists,
            archival_ran: r.archival.ran,
        }
    }
}

#[derive(Tabled)]
struct RenameRow {
    #[tabled(rename = "when")]
    when: String,
    #[tabled(rename = "list")]
    list: String,
    #[tabled(rename = "old name")]
    old_name: String,
    #[tabled(rename = "new name")]
    new_name: String,
    #[tabled(rename = "outcome")]
    outcome: String,
}

fn build_status(state_dir: &Path) -> Result<Status> {
    let names = name_map::load_at(state_dir).context("failed to read name map")?;
    let (entries, skipped) = history::load_at(state_dir).context("failed to read rename history")?;
    let last = report::latest_at(state_dir).context("failed to read last report")?;

    Ok(Status {
        state_dir: state_dir.display().to_string(),
        lists: names
            .file
            .lists
            .iter()
            .map(|(list, name)| ListName {
                list: list.to_string(),
                name: name.clone(),
            })
            .collect(),
        name_map_error: names.corrupt,
        renames: history::recent(&entries, RECENT_RENAMES)
            .into_iter()
            .cloned()
            .collect(),
        skipped_history_lines: skipped,
        last_run: last.as_ref().map(LastRun::from),
    })
}

fn outcome_label(outcome: RenameOutcome) -> String {
    match outcome {
        RenameOutcome::Renamed => "renamed".green().to_string(),
        RenameOutcome::TagUnchanged => "tag unchanged".to_string(),
        RenameOutcome::WouldRename => "would rename".cyan().to_string(),
        RenameOutcome::TagNotFound => "tag not found".yellow().to_string(),
        RenameOutcome::TargetExists => "target exists".yellow().to_string(),
        RenameOutcome::Unsupported => "unsupported".yellow().to_string(),
        RenameOutcome::Failed => "failed".red().to_string(),
        RenameOutcome::Cleared => "retired tag cleared".bright_black().to_string(),
    }
}

fn print_status(status: &Status) {
    println!("listsync v{} | state {}", env!("CARGO_PKG_VERSION"), status.state_dir);
    let separator = "-".repeat(67).bright_black().to_string();
    println!("{separator}");

    println!("{}", "LAST RUN".bold());
    match &status.last_run {
        None => println!("No runs yet."),
        Some(run) => {
            let mode = if run.dry_run { " (dry run)" } else { "" };
            let headline = match (&run.aborted, run.failed + run.failed_lists) {
                (Some(reason), _) => format!("aborted: {reason}").red().bold().to_string(),
                (None, 0) => "completed".green().bold().to_string(),
                (None, _) => "completed with failures".yellow().bold().to_string(),
            };
            println!("{} {headline}{mode}", run.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
            println!(
                "{} applied, {} retried, {} failed, {} planned | {} warning(s), {} failed list(s) | archival {}",
                run.applied,
                run.retried,
                run.failed,
                run.would_apply,
                run.warnings,
                run.failed_lists,
                if run.archival_ran { "ran" } else { "skipped" },
            );
        }
    }
    println!("{separator}");

    println!("{}", "LISTS".bold());
    if let Some(err) = &status.name_map_error {
        println!("{} {err}", "name map unreadable:".yellow());
    }
    if status.lists.is_empty() {
        println!("No list names recorded.");
    } else {
        let rows: Vec<ListName> = status
            .lists
            .iter()
            .map(|l| ListName {
                list: l.list.clone(),
                name: l.name.clone(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }
    println!("{separator}");

    println!("{}", "RECENT RENAMES".bold());
    if status.renames.is_empty() {
        println!("No renames recorded.");
    } else {
        let rows: Vec<RenameRow> = status
            .renames
            .iter()
            .map(|r| RenameRow {
                when: r.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                list: r.list_id.to_string(),
                old_name: r.old_name.clone(),
                new_name: r.new_name.clone(),
                outcome: outcome_label(r.outcome),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }
    if status.skipped_history_lines > 0 {
        println!(
            "{}",
            format!("{} unreadable history line(s) skipped", status.skipped_history_lines).yellow()
        );
    }
}
