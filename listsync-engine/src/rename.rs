//! Rename/merge resolver.
//!
//! When a source list's fresh name differs from its persisted name, the
//! destination tag is renamed in place by id so every tagged contact keeps it.
//! If that is not possible the resolver falls back: the new tag is applied
//! from this pass on and the old tag is retired, to be retracted by ordinary
//! removal on later passes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use listsync_core::{ListId, Mutation, MutationOutcome, TagName};

use crate::desired::tag_for;
use crate::error::{EngineError, PlatformErrorKind};
use crate::executor::Executor;
use crate::history::{RenameEntry, RenameOutcome};
use crate::report::{Direction, MutationRecord, RunReport, Warning, WarningKind};

/// What the resolver decided for one list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Tag to use for the list this pass.
    pub tag: TagName,
    /// Set when a rename was detected.
    pub entry: Option<RenameEntry>,
}

/// Detect and resolve a rename of `list`.
///
/// `previous_name` comes from the name map; `None` means the list has not
/// been seen before and nothing is renamed.
pub fn resolve(
    list: &ListId,
    fresh_name: &str,
    previous_name: Option<&str>,
    overrides: &BTreeMap<ListId, TagName>,
    executor: &mut Executor<'_>,
    report: &mut RunReport,
    now: DateTime<Utc>,
) -> Result<Resolution, EngineError> {
    let new_tag = tag_for(list, fresh_name, overrides);
    let Some(previous) = previous_name.filter(|p| *p != fresh_name) else {
        return Ok(Resolution {
            tag: new_tag,
            entry: None,
        });
    };
    let old_tag = tag_for(list, previous, overrides);
    tracing::info!("list {list} renamed from '{previous}' to '{fresh_name}'");

    let entry = |outcome: RenameOutcome, error: Option<String>| RenameEntry {
        list_id: list.clone(),
        old_name: old_tag.to_string(),
        new_name: new_tag.to_string(),
        timestamp: now,
        outcome,
        error,
    };

    if old_tag == new_tag {
        return Ok(Resolution {
            entry: Some(RenameEntry {
                old_name: previous.to_owned(),
                new_name: fresh_name.to_owned(),
                ..entry(RenameOutcome::TagUnchanged, None)
            }),
            tag: new_tag,
        });
    }

    if executor.is_dry_run() {
        tracing::info!("[dry-run] would rename tag '{old_tag}' to '{new_tag}'");
        return Ok(Resolution {
            entry: Some(entry(RenameOutcome::WouldRename, None)),
            tag: new_tag,
        });
    }

    let (outcome, error) = rename_in_place(list, &old_tag, &new_tag, executor, report)?;
    if outcome.retires_old_tag() {
        let reason = error.clone().unwrap_or_else(|| format!("{outcome:?}"));
        report.warn(
            Warning::new(
                WarningKind::RenameFallback,
                format!(
                    "could not rename tag '{old_tag}' to '{new_tag}' ({reason}); \
                     applying '{new_tag}' and retiring '{old_tag}'"
                ),
            )
            .list(list),
        );
    } else {
        tracing::info!("renamed tag '{old_tag}' to '{new_tag}' in place");
    }
    Ok(Resolution {
        entry: Some(entry(outcome, error)),
        tag: new_tag,
    })
}

fn rename_in_place(
    list: &ListId,
    old_tag: &TagName,
    new_tag: &TagName,
    executor: &mut Executor<'_>,
    report: &mut RunReport,
) -> Result<(RenameOutcome, Option<String>), EngineError> {
    let lookup = |name: &TagName| match executor.find_tag(name) {
        Ok(found) => Ok(Ok(found)),
        Err(e) if e.kind == PlatformErrorKind::Auth => Err(EngineError::Auth(e)),
        Err(e) => Ok(Err(e)),
    };

    let old = match lookup(old_tag)? {
        Ok(found) => found,
        Err(e) if e.kind == PlatformErrorKind::Unsupported => {
            return Ok((RenameOutcome::Unsupported, Some(e.to_string())))
        }
        Err(e) => return Ok((RenameOutcome::Failed, Some(e.to_string()))),
    };
    let existing_new = match lookup(new_tag)? {
        Ok(found) => found,
        Err(e) => return Ok((RenameOutcome::Failed, Some(e.to_string()))),
    };

    let old = match (old, existing_new) {
        (Some(_), Some(_)) => {
            return Ok((
                RenameOutcome::TargetExists,
                Some(format!("tag '{new_tag}' already exists")),
            ))
        }
        // An earlier pass renamed it but never recorded the new name.
        (None, Some(_)) => return Ok((RenameOutcome::Renamed, None)),
        (None, None) => return Ok((RenameOutcome::TagNotFound, None)),
        (Some(old), None) => old,
    };

    let mutation = Mutation::RenameTag {
        tag_id: old.id,
        from: old_tag.clone(),
        to: new_tag.clone(),
    };
    let applied = executor.apply(&mutation)?;
    report.mutations.push(MutationRecord {
        direction: Direction::Forward,
        list: Some(list.clone()),
        idempotency_key: mutation.idempotency_key(),
        mutation,
        outcome: applied.outcome.clone(),
    });
    Ok(match (applied.outcome, applied.error_kind) {
        (MutationOutcome::PermanentFailure { error, .. }, Some(PlatformErrorKind::Unsupported)) => {
            (RenameOutcome::Unsupported, Some(error))
        }
        (MutationOutcome::PermanentFailure { error, .. }, _) => (RenameOutcome::Failed, Some(error)),
        _ => (RenameOutcome::Renamed, None),
    })
}
