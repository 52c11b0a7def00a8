pub mod plan;
pub mod run;
pub mod status;
pub mod validate;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use listsync_core::config::{self, DEFAULT_CONFIG_FILE};
use listsync_core::SyncConfig;
use listsync_engine::{pipeline, Clock, Pacer, Platforms, RunOptions, RunReport, SystemClock};
use listsync_notify::{Renderer, SummaryKind, WebhookNotifier};

use crate::clients::audience::AudienceClient;
use crate::clients::crm::CrmClient;
use crate::clients::Credentials;

/// Exit code of a run that stopped early.
const EXIT_ABORTED: u8 = 2;

/// Options shared by every subcommand.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Path to the config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Log at debug level.
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

/// Restrict a pass to one half-cycle.
#[derive(Args, Debug, Default)]
pub struct DirectionArgs {
    /// Only CRM lists to audience tags.
    #[arg(long, conflicts_with = "reverse_only")]
    pub forward_only: bool,

    /// Only audience exit tags to CRM lists.
    #[arg(long)]
    pub reverse_only: bool,
}

impl DirectionArgs {
    pub fn options(&self, dry_run: bool) -> RunOptions {
        RunOptions {
            dry_run,
            forward: !self.reverse_only,
            reverse: !self.forward_only,
        }
    }
}

pub fn load_config(path: &Path) -> Result<SyncConfig> {
    config::load_at(path).with_context(|| format!("failed to load config {}", path.display()))
}

/// Load the config and refuse to go on if it has errors.
pub fn load_valid_config(path: &Path) -> Result<SyncConfig> {
    let config = load_config(path)?;
    let report = config.ensure_valid()?;
    for warning in &report.warnings {
        tracing::warn!("config: {warning}");
    }
    Ok(config)
}

pub struct Outcome {
    pub report: RunReport,
    pub state_dir: PathBuf,
}

/// Build both clients from the environment and run one pass.
pub fn execute(config: &SyncConfig, opts: RunOptions) -> Result<Outcome> {
    let state_dir = config.state_dir()?;
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("failed to create state dir {}", state_dir.display()))?;
    let creds = Credentials::from_env()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let exec = &config.execution;
    let crm = CrmClient::new(
        &creds.crm_token,
        Pacer::new(Duration::from_millis(exec.source_spacing_ms), clock.clone()),
        exec.page_size,
        config.fields.source_properties(),
    );
    let audience = AudienceClient::new(
        &creds,
        Pacer::new(Duration::from_millis(exec.destination_spacing_ms), clock.clone()),
        exec.page_size,
        &config.fields.origin_field,
    );
    let platforms = Platforms::new(&crm, &audience);

    let report = pipeline::run(config, &state_dir, &platforms, clock.as_ref(), opts)
        .context("run failed")?;
    Ok(Outcome { report, state_dir })
}

fn renderer(state_dir: &Path) -> Option<Renderer> {
    match Renderer::with_overrides(&state_dir.join("templates")) {
        Ok(renderer) => Some(renderer),
        Err(e) => {
            tracing::warn!("summary templates unavailable: {e}");
            None
        }
    }
}

/// Print the text summary; post the card when a webhook is configured.
pub fn announce(outcome: &Outcome) {
    let Some(renderer) = renderer(&outcome.state_dir) else {
        return;
    };
    match renderer.render(&outcome.report, SummaryKind::Text) {
        Ok(text) => println!("{text}"),
        Err(e) => tracing::warn!("could not render summary: {e}"),
    }

    if outcome.report.dry_run {
        return;
    }
    let url = match std::env::var("NOTIFY_WEBHOOK_URL") {
        Ok(url) if !url.trim().is_empty() => url,
        _ => return,
    };
    if let Err(e) = WebhookNotifier::new(url).send(&renderer, &outcome.report) {
        tracing::warn!("notification failed: {e}");
    }
}

pub fn exit_code(report: &RunReport) -> ExitCode {
    match &report.aborted {
        Some(reason) => {
            eprintln!("{} {reason}", "run aborted:".red().bold());
            ExitCode::from(EXIT_ABORTED)
        }
        None => ExitCode::SUCCESS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_flags() {
        let both = DirectionArgs::default().options(false);
        assert!(both.forward && both.reverse && !both.dry_run);

        let forward = DirectionArgs { forward_only: true, reverse_only: false }.options(true);
        assert!(forward.forward && !forward.reverse && forward.dry_run);

        let reverse = DirectionArgs { forward_only: false, reverse_only: true }.options(false);
        assert!(!reverse.forward && reverse.reverse);
    }
}
