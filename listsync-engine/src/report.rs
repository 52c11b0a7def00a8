//! Per-run report: every mutation attempted, warnings, failed lists, totals.
//!
//! Persisted as `<state>/reports/run-<UTC timestamp>.json`. Reports older than
//! the retention window are pruned after each run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use listsync_core::{ListId, Mutation, MutationOutcome, TagName};

use crate::error::{io_err, EngineError};
use crate::history::RenameEntry;

const REPORT_PREFIX: &str = "run-";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";
/// Second-precision names, still read.
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

// ---------------------------------------------------------------------------
// Report model
// ---------------------------------------------------------------------------

/// Which half-cycle produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// CRM lists → audience tags.
    Forward,
    /// Audience exit tags → CRM lists.
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    MissingEmail,
    InvalidEmail,
    HardExcluded,
    Truncated,
    ListFetchFailed,
    RenameFallback,
    MissingField,
    LookupFailed,
    StateUnreadable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<ListId>,
    /// Email or member id the warning is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            list: None,
            contact: None,
            message: message.into(),
        }
    }

    pub fn list(mut self, list: &ListId) -> Self {
        self.list = Some(list.clone());
        self
    }

    pub fn contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = Some(contact.into());
        self
    }
}

/// One applied (or planned, in dry-run) mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<ListId>,
    pub mutation: Mutation,
    #[serde(flatten)]
    pub outcome: MutationOutcome,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListStatus {
    Synced,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSummary {
    pub direction: Direction,
    pub list: ListId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<TagName>,
    pub members: usize,
    pub status: ListStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Whether global archival ran, and why not if it didn't.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivalSummary {
    pub ran: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
    pub candidates: usize,
    pub exempt: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub success: usize,
    pub retried_success: usize,
    pub permanent_failure: usize,
    pub would_apply: usize,
}

impl OutcomeCounts {
    fn add(&mut self, outcome: &MutationOutcome) {
        match outcome {
            MutationOutcome::Success => self.success += 1,
            MutationOutcome::RetriedSuccess { .. } => self.retried_success += 1,
            MutationOutcome::PermanentFailure { .. } => self.permanent_failure += 1,
            MutationOutcome::WouldApply => self.would_apply += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.success + self.retried_success + self.permanent_failure + self.would_apply
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub all: OutcomeCounts,
    pub by_kind: BTreeMap<String, OutcomeCounts>,
    pub warnings: usize,
    pub failed_lists: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    #[serde(default)]
    pub lists: Vec<ListSummary>,
    #[serde(default)]
    pub renames: Vec<RenameEntry>,
    #[serde(default)]
    pub mutations: Vec<MutationRecord>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    #[serde(default)]
    pub archival: ArchivalSummary,
    /// Set when the run stopped early (auth or unrepairable schema).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    #[serde(default)]
    pub totals: Totals,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            started_at,
            finished_at: None,
            dry_run,
            lists: Vec::new(),
            renames: Vec::new(),
            mutations: Vec::new(),
            warnings: Vec::new(),
            archival: ArchivalSummary::default(),
            aborted: None,
            totals: Totals::default(),
        }
    }

    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("{}", warning.message);
        self.warnings.push(warning);
    }

    pub fn failed_lists(&self) -> impl Iterator<Item = &ListSummary> {
        self.lists.iter().filter(|l| l.status == ListStatus::Failed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &MutationRecord> {
        self.mutations.iter().filter(|m| m.outcome.is_failure())
    }

    /// Stamp `finished_at` and recompute totals.
    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.finished_at = Some(at);
        let mut totals = Totals {
            warnings: self.warnings.len(),
            failed_lists: self.failed_lists().count(),
            ..Totals::default()
        };
        for record in &self.mutations {
            totals.all.add(&record.outcome);
            totals
                .by_kind
                .entry(record.mutation.kind().as_str().to_owned())
                .or_default()
                .add(&record.outcome);
        }
        self.totals = totals;
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// `<state>/reports/`
pub fn reports_dir_at(state_dir: &Path) -> PathBuf {
    state_dir.join("reports")
}

/// `<state>/reports/run-<started_at>.json`, or `run-<started_at>-<n>.json`
/// when a report for the same millisecond already exists.
pub fn report_path_at(state_dir: &Path, report: &RunReport) -> PathBuf {
    let dir = reports_dir_at(state_dir);
    let stamp = report.started_at.format(TIMESTAMP_FORMAT).to_string();
    let mut path = dir.join(format!("{REPORT_PREFIX}{stamp}.json"));
    let mut seq = 1;
    while path.exists() {
        seq += 1;
        path = dir.join(format!("{REPORT_PREFIX}{stamp}-{seq}.json"));
    }
    path
}

/// Save atomically; returns the final path.
pub fn save_at(state_dir: &Path, report: &RunReport) -> Result<PathBuf, EngineError> {
    let dir = reports_dir_at(state_dir);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let path = report_path_at(state_dir, report);
    let json = serde_json::to_string_pretty(report)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

/// Start time and sequence number encoded in a report file name.
fn report_key(file_name: &str) -> Option<(DateTime<Utc>, u32)> {
    let stem = file_name.strip_prefix(REPORT_PREFIX)?.strip_suffix(".json")?;
    let (stamp, seq) = match stem.rsplit_once('-') {
        Some((stamp, seq)) => (stamp, seq.parse().ok()?),
        None => (stem, 1),
    };
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(stamp, LEGACY_TIMESTAMP_FORMAT))
        .ok()
        .map(|naive| (naive.and_utc(), seq))
}

/// Report files in the directory, oldest first.
fn report_files(state_dir: &Path) -> Result<Vec<(DateTime<Utc>, u32, PathBuf)>, EngineError> {
    let dir = reports_dir_at(state_dir);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<_> = std::fs::read_dir(&dir)
        .map_err(|e| io_err(&dir, e))?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            report_key(&name).map(|(ts, seq)| (ts, seq, e.path()))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Delete reports older than `retention_days` before `now`. Returns how many.
///
/// The most recent report is always kept.
pub fn prune_at(
    state_dir: &Path,
    retention_days: u32,
    now: DateTime<Utc>,
) -> Result<usize, EngineError> {
    let cutoff = now - ChronoDuration::days(i64::from(retention_days));
    let mut files = report_files(state_dir)?;
    files.pop();
    let mut removed = 0;
    for (ts, _, path) in files {
        if ts < cutoff {
            std::fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
            tracing::debug!("pruned report {}", path.display());
            removed += 1;
        }
    }
    Ok(removed)
}

/// The most recent report, if any.
pub fn latest_at(state_dir: &Path) -> Result<Option<RunReport>, EngineError> {
    let Some((_, _, path)) = report_files(state_dir)?.pop() else {
        return Ok(None);
    };
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(Some(serde_json::from_str(&contents)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use listsync_core::Email;
    use tempfile::TempDir;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn record(outcome: MutationOutcome) -> MutationRecord {
        let mutation = Mutation::Archive {
            contact: Email::parse("a@x.com").unwrap(),
        };
        MutationRecord {
            direction: Direction::Forward,
            list: None,
            idempotency_key: mutation.idempotency_key(),
            mutation,
            outcome,
        }
    }

    #[test]
    fn finish_computes_totals() {
        let mut report = RunReport::new(at(1), false);
        report.mutations.push(record(MutationOutcome::Success));
        report.mutations.push(record(MutationOutcome::RetriedSuccess { attempts: 2 }));
        report.mutations.push(record(MutationOutcome::PermanentFailure {
            attempts: 3,
            error: "503".into(),
        }));
        report.warn(Warning::new(WarningKind::InvalidEmail, "bad"));
        report.finish(at(1));

        assert_eq!(report.totals.all.total(), 3);
        assert_eq!(report.totals.all.permanent_failure, 1);
        assert_eq!(report.totals.by_kind["archive"].success, 1);
        assert_eq!(report.totals.warnings, 1);
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn save_then_latest() {
        let tmp = TempDir::new().unwrap();
        let mut older = RunReport::new(at(1), false);
        older.finish(at(1));
        let mut newer = RunReport::new(at(2), true);
        newer.mutations.push(record(MutationOutcome::WouldApply));
        newer.finish(at(2));

        save_at(tmp.path(), &older).unwrap();
        let path = save_at(tmp.path(), &newer).unwrap();
        assert!(path.ends_with("run-20240302T120000.000Z.json"));
        assert!(!path.with_extension("json.tmp").exists());

        let latest = latest_at(tmp.path()).unwrap().unwrap();
        assert_eq!(latest, newer);
    }

    #[test]
    fn runs_in_the_same_instant_keep_both_reports() {
        let tmp = TempDir::new().unwrap();
        let mut first = RunReport::new(at(1), false);
        first.mutations.push(record(MutationOutcome::Success));
        first.mutations.push(record(MutationOutcome::Success));
        first.finish(at(1));
        let mut second = RunReport::new(at(1), false);
        second.finish(at(1));

        let a = save_at(tmp.path(), &first).unwrap();
        let b = save_at(tmp.path(), &second).unwrap();
        assert_ne!(a, b);
        assert!(b.ends_with("run-20240301T120000.000Z-2.json"));
        assert_eq!(report_files(tmp.path()).unwrap().len(), 2);
        assert_eq!(latest_at(tmp.path()).unwrap().unwrap(), second);
    }

    #[test]
    fn second_precision_names_are_still_read() {
        let tmp = TempDir::new().unwrap();
        let dir = reports_dir_at(tmp.path());
        std::fs::create_dir_all(&dir).unwrap();
        let mut old = RunReport::new(at(1), false);
        old.finish(at(1));
        std::fs::write(dir.join("run-20240301T120000Z.json"), serde_json::to_string(&old).unwrap()).unwrap();

        assert_eq!(latest_at(tmp.path()).unwrap().unwrap(), old);
    }

    #[test]
    fn latest_is_none_without_reports() {
        let tmp = TempDir::new().unwrap();
        assert!(latest_at(tmp.path()).unwrap().is_none());
    }

    #[test]
    fn prune_removes_only_expired_reports() {
        let tmp = TempDir::new().unwrap();
        for day in [1, 5, 9] {
            save_at(tmp.path(), &RunReport::new(at(day), false)).unwrap();
        }
        std::fs::write(reports_dir_at(tmp.path()).join("notes.txt"), "keep").unwrap();

        let removed = prune_at(tmp.path(), 7, at(10)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(report_files(tmp.path()).unwrap().len(), 2);
        assert!(reports_dir_at(tmp.path()).join("notes.txt").exists());
    }

    #[test]
    fn prune_never_removes_the_latest_report() {
        let tmp = TempDir::new().unwrap();
        save_at(tmp.path(), &RunReport::new(at(1), false)).unwrap();
        save_at(tmp.path(), &RunReport::new(at(2), false)).unwrap();

        let removed = prune_at(tmp.path(), 0, at(3)).unwrap();
        assert_eq!(removed, 1);
        assert!(latest_at(tmp.path()).unwrap().is_some());
    }
}
