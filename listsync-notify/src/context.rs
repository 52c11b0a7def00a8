//! Summary context: the serializable rendering payload built from a [`RunReport`].

use std::collections::BTreeMap;

use serde::Serialize;

use listsync_engine::report::{Direction, ListStatus, RunReport};

use crate::error::RenderError;

/// Failures listed individually; the rest are only counted.
pub const MAX_LISTED_FAILURES: usize = 20;

/// Flat rendering payload shared by every summary template.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryContext {
    /// `ok`, `failures` or `aborted`.
    pub status: String,
    pub headline: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_secs: Option<i64>,
    pub dry_run: bool,
    pub aborted: Option<String>,
    pub lists: Vec<ListCtx>,
    pub totals: TotalsCtx,
    pub kinds: Vec<KindCtx>,
    pub renames: Vec<RenameCtx>,
    pub failures: Vec<FailureCtx>,
    /// Failures beyond [`MAX_LISTED_FAILURES`].
    pub more_failures: usize,
    pub warnings: Vec<WarningCtx>,
    pub archival: ArchivalCtx,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListCtx {
    pub direction: String,
    pub list: String,
    pub name: String,
    pub tag: String,
    pub members: usize,
    pub failed: bool,
    pub error: Option<String>,
    /// Pre-rendered one-line description shared by every template.
    pub line: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TotalsCtx {
    pub applied: usize,
    pub retried: usize,
    pub failed: usize,
    pub would_apply: usize,
    pub total: usize,
    pub warnings: usize,
    pub failed_lists: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct KindCtx {
    pub kind: String,
    pub applied: usize,
    pub retried: usize,
    pub failed: usize,
    pub would_apply: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenameCtx {
    pub list: String,
    pub old_name: String,
    pub new_name: String,
    pub outcome: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureCtx {
    pub direction: String,
    pub mutation: String,
    pub attempts: u32,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarningCtx {
    pub kind: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchivalCtx {
    pub ran: bool,
    pub skipped_reason: Option<String>,
    pub candidates: usize,
    pub exempt: usize,
}

fn direction_str(direction: Direction) -> &'static str {
    match direction {
        Direction::Forward => "forward",
        Direction::Reverse => "reverse",
    }
}

fn snake(value: &impl Serialize) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

impl SummaryContext {
    /// Build the context from a finished report.
    pub fn from_report(report: &RunReport) -> Self {
        let status = if report.aborted.is_some() {
            "aborted"
        } else if report.totals.all.permanent_failure > 0 || report.totals.failed_lists > 0 {
            "failures"
        } else {
            "ok"
        };
        let mode = if report.dry_run { " (dry run)" } else { "" };
        let headline = match status {
            "aborted" => format!("listsync run aborted{mode}"),
            "failures" => format!("listsync run completed with failures{mode}"),
            _ => format!("listsync run completed{mode}"),
        };

        let lists = report
            .lists
            .iter()
            .map(|l| {
                let failed = l.status == ListStatus::Failed;
                let mut line = format!("[{}] {}", direction_str(l.direction), l.list);
                if let Some(name) = &l.name {
                    line.push_str(&format!(" \"{name}\""));
                }
                if let Some(tag) = &l.tag {
                    line.push_str(&format!(" -> {tag}"));
                }
                match (failed, &l.error) {
                    (true, Some(error)) => line.push_str(&format!(": FAILED ({error})")),
                    (true, None) => line.push_str(": FAILED"),
                    (false, _) => line.push_str(&format!(": {} members", l.members)),
                }
                ListCtx {
                    direction: direction_str(l.direction).to_owned(),
                    list: l.list.to_string(),
                    name: l.name.clone().unwrap_or_default(),
                    tag: l.tag.as_ref().map(|t| t.to_string()).unwrap_or_default(),
                    members: l.members,
                    failed,
                    error: l.error.clone(),
                    line,
                }
            })
            .collect();

        let all = &report.totals.all;
        let totals = TotalsCtx {
            applied: all.success,
            retried: all.retried_success,
            failed: all.permanent_failure,
            would_apply: all.would_apply,
            total: all.total(),
            warnings: report.totals.warnings,
            failed_lists: report.totals.failed_lists,
        };

        let kinds = report
            .totals
            .by_kind
            .iter()
            .map(|(kind, c)| KindCtx {
                kind: kind.clone(),
                applied: c.success,
                retried: c.retried_success,
                failed: c.permanent_failure,
                would_apply: c.would_apply,
            })
            .collect();

        let renames = report
            .renames
            .iter()
            .map(|r| RenameCtx {
                list: r.list_id.to_string(),
                old_name: r.old_name.clone(),
                new_name: r.new_name.clone(),
                outcome: snake(&r.outcome),
            })
            .collect();

        let all_failures: Vec<_> = report.failures().collect();
        let more_failures = all_failures.len().saturating_sub(MAX_LISTED_FAILURES);
        let failures = all_failures
            .into_iter()
            .take(MAX_LISTED_FAILURES)
            .map(|m| FailureCtx {
                direction: direction_str(m.direction).to_owned(),
                mutation: m.mutation.to_string(),
                attempts: m.outcome.attempts(),
                error: match &m.outcome {
                    listsync_core::MutationOutcome::PermanentFailure { error, .. } => error.clone(),
                    _ => String::new(),
                },
            })
            .collect();

        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        for w in &report.warnings {
            *by_kind.entry(snake(&w.kind)).or_default() += 1;
        }
        let warnings = by_kind
            .into_iter()
            .map(|(kind, count)| WarningCtx { kind, count })
            .collect();

        SummaryContext {
            status: status.to_owned(),
            headline,
            started_at: report.started_at.to_rfc3339(),
            finished_at: report.finished_at.map(|t| t.to_rfc3339()),
            duration_secs: report
                .finished_at
                .map(|t| (t - report.started_at).num_seconds()),
            dry_run: report.dry_run,
            aborted: report.aborted.clone(),
            lists,
            totals,
            kinds,
            renames,
            failures,
            more_failures,
            warnings,
            archival: ArchivalCtx {
                ran: report.archival.ran,
                skipped_reason: report.archival.skipped_reason.clone(),
                candidates: report.archival.candidates,
                exempt: report.archival.exempt,
            },
        }
    }

    /// Convert into a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use listsync_core::{Email, ListId, Mutation, MutationOutcome};
    use listsync_engine::report::{ListSummary, MutationRecord, Warning, WarningKind};

    fn report() -> RunReport {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut report = RunReport::new(start, false);
        report.lists.push(ListSummary {
            direction: Direction::Forward,
            list: ListId::from("718"),
            name: Some("General".into()),
            tag: Some("General".into()),
            members: 2,
            status: ListStatus::Synced,
            error: None,
        });
        report
    }

    fn failure(email: &str) -> MutationRecord {
        let mutation = Mutation::Archive { contact: Email::parse(email).unwrap() };
        MutationRecord {
            direction: Direction::Forward,
            list: None,
            idempotency_key: mutation.idempotency_key(),
            mutation,
            outcome: MutationOutcome::PermanentFailure { attempts: 3, error: "503".into() },
        }
    }

    #[test]
    fn clean_run_is_ok() {
        let mut report = report();
        report.finish(report.started_at + chrono::Duration::seconds(42));
        let ctx = SummaryContext::from_report(&report);
        assert_eq!(ctx.status, "ok");
        assert_eq!(ctx.duration_secs, Some(42));
        assert_eq!(ctx.lists[0].tag, "General");
        assert_eq!(ctx.lists[0].line, "[forward] 718 \"General\" -> General: 2 members");
        assert!(!ctx.lists[0].failed);
    }

    #[test]
    fn failures_are_capped_and_counted() {
        let mut report = report();
        for i in 0..(MAX_LISTED_FAILURES + 3) {
            report.mutations.push(failure(&format!("c{i}@x.com")));
        }
        report.warn(Warning::new(WarningKind::InvalidEmail, "bad"));
        report.warn(Warning::new(WarningKind::InvalidEmail, "worse"));
        report.finish(report.started_at);

        let ctx = SummaryContext::from_report(&report);
        assert_eq!(ctx.status, "failures");
        assert_eq!(ctx.failures.len(), MAX_LISTED_FAILURES);
        assert_eq!(ctx.more_failures, 3);
        assert_eq!(ctx.failures[0].error, "503");
        assert_eq!(ctx.warnings[0].kind, "invalid_email");
        assert_eq!(ctx.warnings[0].count, 2);
    }

    #[test]
    fn aborted_run_wins_over_failures() {
        let mut report = report();
        report.mutations.push(failure("a@x.com"));
        report.aborted = Some("authentication failed".into());
        report.finish(report.started_at);
        let ctx = SummaryContext::from_report(&report);
        assert_eq!(ctx.status, "aborted");
        assert!(ctx.headline.contains("aborted"));
    }
}
