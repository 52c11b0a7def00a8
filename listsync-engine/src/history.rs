//! Append-only rename history at `<state>/rename_history.jsonl`.
//!
//! One JSON object per line. Lines that do not parse are skipped on read so a
//! single bad write never hides the rest of the log.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use listsync_core::{ListId, TagName};

use crate::error::{io_err, EngineError};

/// What happened to the destination tag when a list rename was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenameOutcome {
    /// Tag renamed in place; id and membership preserved.
    Renamed,
    /// The old tag does not exist on the destination.
    TagNotFound,
    /// A tag with the new name already exists; the two are merged over
    /// subsequent passes.
    TargetExists,
    /// The destination has no in-place rename primitive.
    Unsupported,
    /// The rename call failed.
    Failed,
    /// The list's tag comes from an override, so no tag changed.
    TagUnchanged,
    /// Dry run: nothing was sent.
    WouldRename,
    /// A retired tag no live record carries any more; it is no longer scanned.
    Cleared,
}

impl RenameOutcome {
    /// The old tag stays behind and must be retracted on later passes.
    pub fn retires_old_tag(&self) -> bool {
        matches!(
            self,
            RenameOutcome::TagNotFound
                | RenameOutcome::TargetExists
                | RenameOutcome::Unsupported
                | RenameOutcome::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameEntry {
    pub list_id: ListId,
    pub old_name: String,
    pub new_name: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: RenameOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `<state>/rename_history.jsonl`
pub fn history_path_at(state_dir: &Path) -> PathBuf {
    state_dir.join("rename_history.jsonl")
}

/// Append one entry.
pub fn append_at(state_dir: &Path, entry: &RenameEntry) -> Result<(), EngineError> {
    std::fs::create_dir_all(state_dir).map_err(|e| io_err(state_dir, e))?;
    let path = history_path_at(state_dir);
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| io_err(&path, e))?;
    file.write_all(line.as_bytes()).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// Every readable entry in file order, plus the number of skipped lines.
pub fn load_at(state_dir: &Path) -> Result<(Vec<RenameEntry>, usize), EngineError> {
    let path = history_path_at(state_dir);
    if !path.exists() {
        return Ok((Vec::new(), 0));
    }
    let contents = std::fs::read(&path).map_err(|e| io_err(&path, e))?;
    let mut entries = Vec::new();
    let mut skipped = 0;
    for (n, raw) in contents.split(|b| *b == b'\n').enumerate() {
        let parsed = std::str::from_utf8(raw)
            .map_err(|e| e.to_string())
            .and_then(|line| match line.trim() {
                "" => Ok(None),
                line => serde_json::from_str::<RenameEntry>(line)
                    .map(Some)
                    .map_err(|e| e.to_string()),
            });
        match parsed {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("{}:{}: skipping unreadable entry: {e}", path.display(), n + 1);
                skipped += 1;
            }
        }
    }
    Ok((entries, skipped))
}

/// Old tag names left behind by failed renames and not cleared since, per list.
pub fn retired_tags(entries: &[RenameEntry]) -> BTreeMap<ListId, BTreeSet<TagName>> {
    let mut retired: BTreeMap<ListId, BTreeSet<TagName>> = BTreeMap::new();
    for entry in entries {
        let tag = TagName::from(entry.old_name.as_str());
        if entry.outcome.retires_old_tag() {
            retired.entry(entry.list_id.clone()).or_default().insert(tag);
        } else if entry.outcome == RenameOutcome::Cleared {
            if let Some(tags) = retired.get_mut(&entry.list_id) {
                tags.remove(&tag);
            }
        }
    }
    retired.retain(|_, tags| !tags.is_empty());
    retired
}

/// The history entry that stops `tag` being treated as retired for `list`.
pub fn cleared(list: &ListId, tag: &TagName, list_name: &str, now: DateTime<Utc>) -> RenameEntry {
    RenameEntry {
        list_id: list.clone(),
        old_name: tag.to_string(),
        new_name: list_name.to_owned(),
        timestamp: now,
        outcome: RenameOutcome::Cleared,
        error: None,
    }
}

/// The `limit` most recent entries, newest first.
pub fn recent(entries: &[RenameEntry], limit: usize) -> Vec<&RenameEntry> {
    entries.iter().rev().take(limit).collect()
}
