//! Shared run entrypoint used by the CLI.
//!
//! One run is a forward half-cycle (CRM lists → audience tags) followed by a
//! reverse half-cycle (audience exit tags → CRM lists). Both end in a single
//! [`RunReport`] that is saved under the state directory whether or not the
//! run completed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::Utc;

use listsync_core::{
    ContactStatus, DestinationRecord, Email, Fields, ListId, MemberId, RecordId, SourceContact, SyncConfig,
    TagName,
};

use crate::clock::Clock;
use crate::desired::{self, DesiredState, ListSnapshot};
use crate::error::{EngineError, PlatformError, PlatformErrorKind};
use crate::executor::Executor;
use crate::history;
use crate::name_map;
use crate::planner::{self, ContactTarget, PlanOptions, Presence};
use crate::platform::{DestinationMutator, SourceLister};
use crate::rename;
use crate::report::{
    self, ArchivalSummary, Direction, ListStatus, ListSummary, RunReport, Warning, WarningKind,
};
use crate::retry::RetryPolicy;

/// Which parts of a run to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Plan and report, but send no mutation and write no name map or history.
    pub dry_run: bool,
    pub forward: bool,
    pub reverse: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            forward: true,
            reverse: true,
        }
    }
}

/// The two platforms, each in both of its roles.
pub struct Platforms<'a> {
    /// CRM lists, read in the forward half-cycle.
    pub crm_lists: &'a dyn SourceLister,
    /// Audience, written in the forward half-cycle.
    pub audience: &'a dyn DestinationMutator,
    /// Audience exit tags, read in the reverse half-cycle.
    pub exit_tags: &'a dyn SourceLister,
    /// CRM, written in the reverse half-cycle. List ids act as tags.
    pub crm: &'a dyn DestinationMutator,
}

impl<'a> Platforms<'a> {
    pub fn new<C, A>(crm: &'a C, audience: &'a A) -> Self
    where
        C: SourceLister + DestinationMutator,
        A: SourceLister + DestinationMutator,
    {
        Self {
            crm_lists: crm,
            audience,
            exit_tags: audience,
            crm,
        }
    }
}

/// Run one pass and save its report.
///
/// Authentication failures, unreachable platforms and unrepairable schema
/// errors stop the run; the report is still saved, with
/// [`RunReport::aborted`] set. Invalid configuration and state I/O failures
/// are returned as errors.
pub fn run(
    config: &SyncConfig,
    state_dir: &Path,
    platforms: &Platforms<'_>,
    clock: &dyn Clock,
    opts: RunOptions,
) -> Result<RunReport, EngineError> {
    config.ensure_valid()?;
    let mut report = RunReport::new(Utc::now(), opts.dry_run);
    let pass = Pass {
        config,
        state_dir,
        clock,
        policy: RetryPolicy::from(&config.execution),
        dry_run: opts.dry_run,
    };

    match pass.run(platforms, opts, &mut report) {
        Ok(()) => {}
        Err(e) if e.is_abort() => {
            tracing::error!("run aborted: {e}");
            report.aborted = Some(e.to_string());
        }
        Err(e) => return Err(e),
    }

    report.finish(Utc::now());
    let path = report::save_at(state_dir, &report)?;
    tracing::info!("report written to {}", path.display());
    let pruned = report::prune_at(state_dir, config.state.report_retention_days, Utc::now())?;
    if pruned > 0 {
        tracing::info!("pruned {pruned} old report(s)");
    }
    Ok(report)
}

struct Pass<'a> {
    config: &'a SyncConfig,
    state_dir: &'a Path,
    clock: &'a dyn Clock,
    policy: RetryPolicy,
    dry_run: bool,
}

fn abort_on_auth(error: PlatformError) -> Result<PlatformError, EngineError> {
    if error.kind == PlatformErrorKind::Auth {
        Err(EngineError::Auth(error))
    } else {
        Ok(error)
    }
}

impl Pass<'_> {
    fn run(
        &self,
        platforms: &Platforms<'_>,
        opts: RunOptions,
        report: &mut RunReport,
    ) -> Result<(), EngineError> {
        self.verify("crm", || platforms.crm_lists.verify_access())?;
        self.verify("audience", || platforms.audience.verify_access())?;

        if opts.forward {
            self.forward(platforms.crm_lists, platforms.audience, report)?;
        }
        if opts.reverse {
            self.reverse(platforms.exit_tags, platforms.crm, platforms.audience, report)?;
        }
        Ok(())
    }

    fn retried<T, F>(&self, op: &str, f: F) -> Result<T, PlatformError>
    where
        F: FnMut() -> Result<T, PlatformError>,
    {
        self.policy
            .execute(self.clock, op, f)
            .map(|(value, _)| value)
            .map_err(|e| e.error)
    }

    fn verify<F>(&self, platform: &str, f: F) -> Result<(), EngineError>
    where
        F: FnMut() -> Result<(), PlatformError>,
    {
        match self.retried("verify_access", f) {
            Ok(()) => Ok(()),
            Err(e) if e.kind == PlatformErrorKind::Auth => Err(EngineError::Auth(e)),
            Err(e) => {
                tracing::error!("{platform} is not reachable: {e}");
                Err(EngineError::Unreachable(e))
            }
        }
    }

    /// The reverse half-cycle archives this record, and archival wins over
    /// re-subscribing it.
    fn is_exiting(&self, record: &DestinationRecord) -> bool {
        let reverse = &self.config.reverse;
        reverse.enabled
            && reverse.archive_exit_contacts
            && record.tags.iter().any(|t| reverse.exit_tags.contains_key(t))
    }

    fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            retract: self.config.execution.contact_limit == 0,
            ..PlanOptions::default()
        }
    }

    // ----- fetching -----

    /// Every member id of `list`, page by page, stopping at the contact limit.
    fn member_ids(&self, source: &dyn SourceLister, list: &ListId) -> Result<Vec<MemberId>, PlatformError> {
        let limit = self.config.execution.contact_limit;
        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.retried("list_memberships", || {
                source.list_memberships(list, cursor.as_deref())
            })?;
            ids.extend(page.member_ids);
            if limit > 0 && ids.len() >= limit {
                ids.truncate(limit);
                tracing::info!("list {list}: stopped at contact limit {limit}");
                break;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(ids)
    }

    fn snapshot(
        &self,
        source: &dyn SourceLister,
        list: &ListId,
        tag_of: impl Fn(&str) -> TagName,
    ) -> Result<ListSnapshot, PlatformError> {
        let name = self.retried("get_list_name", || source.get_list_name(list))?;
        let ids = self.member_ids(source, list)?;
        let mut contacts: Vec<SourceContact> = Vec::with_capacity(ids.len());
        for batch in ids.chunks(self.config.execution.detail_batch_size.max(1)) {
            contacts.extend(self.retried("fetch_details", || source.fetch_details(batch))?);
        }
        tracing::info!("list {list} ('{name}'): {} member(s)", contacts.len());
        Ok(ListSnapshot {
            list: list.clone(),
            tag: tag_of(&name),
            name,
            contacts,
        })
    }

    fn list_failed(
        &self,
        direction: Direction,
        list: &ListId,
        error: &PlatformError,
        report: &mut RunReport,
    ) {
        report.warn(
            Warning::new(
                WarningKind::ListFetchFailed,
                format!("list {list} could not be fetched: {error}"),
            )
            .list(list),
        );
        report.lists.push(ListSummary {
            direction,
            list: list.clone(),
            name: None,
            tag: None,
            members: 0,
            status: ListStatus::Failed,
            error: Some(error.to_string()),
        });
    }

    // ----- forward -----

    fn forward(
        &self,
        source: &dyn SourceLister,
        dest: &dyn DestinationMutator,
        report: &mut RunReport,
    ) -> Result<(), EngineError> {
        let config = self.config;
        tracing::info!("forward: {} list(s)", config.forward.lists.len());

        let excluded = match self.excluded_members(source) {
            Ok(excluded) => excluded,
            Err((list, e)) => {
                let e = abort_on_auth(e)?;
                report.warn(
                    Warning::new(
                        WarningKind::ListFetchFailed,
                        format!("hard-exclude list {list} could not be fetched: {e}; skipping every forward list"),
                    )
                    .list(&list),
                );
                for list in &config.forward.lists {
                    self.list_failed(Direction::Forward, list, &e, report);
                }
                report.archival = ArchivalSummary {
                    skipped_reason: Some(format!("hard-exclude list {list} failed")),
                    ..ArchivalSummary::default()
                };
                return Ok(());
            }
        };

        let mut snapshots = Vec::new();
        let mut failed: BTreeSet<ListId> = BTreeSet::new();
        let mut seen = BTreeSet::new();
        for list in config.forward.lists.iter().filter(|l| seen.insert(*l)) {
            let overrides = &config.forward.tag_overrides;
            match self.snapshot(source, list, |name| desired::tag_for(list, name, overrides)) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    let e = abort_on_auth(e)?;
                    self.list_failed(Direction::Forward, list, &e, report);
                    failed.insert(list.clone());
                }
            }
        }

        let mut state = desired::compute(&snapshots, &excluded, &config.fields);
        for warning in std::mem::take(&mut state.warnings) {
            report.warn(warning);
        }
        if !snapshots.is_empty() {
            self.ensure_fields(dest, report)?;
        }

        let loaded = name_map::load_at(self.state_dir)?;
        if let Some(reason) = loaded.corrupt {
            report.warn(Warning::new(
                WarningKind::StateUnreadable,
                format!("name map unreadable, assuming no renames: {reason}"),
            ));
        }
        let mut names = loaded.file;
        let (entries, skipped) = history::load_at(self.state_dir)?;
        if skipped > 0 {
            report.warn(Warning::new(
                WarningKind::StateUnreadable,
                format!("{skipped} rename history line(s) skipped"),
            ));
        }
        let retired = history::retired_tags(&entries);

        let gate = self.archival_gate(&failed);
        let mut exec = Executor::new(dest, self.clock, self.policy.clone(), Direction::Forward, self.dry_run);

        for snapshot in &snapshots {
            let list = &snapshot.list;
            let previous = names.lists.get(list).map(String::as_str);
            let resolution = rename::resolve(
                list,
                &snapshot.name,
                previous,
                &config.forward.tag_overrides,
                &mut exec,
                report,
                Utc::now(),
            )?;
            if let Some(entry) = resolution.entry {
                if !self.dry_run {
                    history::append_at(self.state_dir, &entry)?;
                }
                report.renames.push(entry);
            }

            let mut managed: BTreeSet<TagName> = retired.get(list).cloned().unwrap_or_default();
            managed.insert(resolution.tag.clone());
            managed.retain(|t| !config.archival.is_preserved(t));

            self.sync_members(snapshot, &state, &managed, &failed, &mut exec, report)?;
            if self.config.execution.contact_limit == 0 {
                self.retract_stale(dest, snapshot, &state, &managed, &failed, gate.is_ok(), &mut exec, report)?;
                if !self.dry_run {
                    let retired: BTreeSet<&TagName> =
                        managed.iter().filter(|t| **t != resolution.tag).collect();
                    self.clear_retired(dest, snapshot, retired)?;
                }
            }

            report.lists.push(ListSummary {
                direction: Direction::Forward,
                list: list.clone(),
                name: Some(snapshot.name.clone()),
                tag: Some(resolution.tag),
                members: state.members.get(list).map_or(0, BTreeSet::len),
                status: ListStatus::Synced,
                error: None,
            });

            names.lists.insert(list.clone(), snapshot.name.clone());
            if !self.dry_run {
                names.updated_at = Utc::now();
                name_map::save_at(self.state_dir, &names)?;
            }
        }

        match gate {
            Ok(()) => {
                let mut managed: BTreeSet<TagName> =
                    snapshots.iter().map(|s| s.tag.clone()).collect();
                managed.extend(retired.into_values().flatten());
                self.archive_absent(dest, &state, &managed, &mut exec, report)?;
            }
            Err(reason) => {
                tracing::info!("archival skipped: {reason}");
                report.archival = ArchivalSummary {
                    skipped_reason: Some(reason),
                    ..ArchivalSummary::default()
                };
            }
        }
        Ok(())
    }

    /// Member ids of every hard-exclude list, or the first list that failed.
    fn excluded_members(
        &self,
        source: &dyn SourceLister,
    ) -> Result<BTreeSet<MemberId>, (ListId, PlatformError)> {
        let mut excluded = BTreeSet::new();
        for list in &self.config.forward.hard_exclude_lists {
            let ids = self.member_ids(source, list).map_err(|e| (list.clone(), e))?;
            tracing::debug!("hard-exclude list {list}: {} member(s)", ids.len());
            excluded.extend(ids);
        }
        Ok(excluded)
    }

    /// Archival runs only when every list was confirmed this pass.
    fn archival_gate(&self, failed: &BTreeSet<ListId>) -> Result<(), String> {
        if !self.config.archival.enabled {
            return Err("archival disabled".to_string());
        }
        if self.config.execution.contact_limit > 0 {
            return Err("contact limit active".to_string());
        }
        if !failed.is_empty() {
            return Err(format!("{} list(s) failed to fetch", failed.len()));
        }
        Ok(())
    }

    /// Create any mapped field the destination does not have yet.
    fn ensure_fields(&self, dest: &dyn DestinationMutator, report: &mut RunReport) -> Result<(), EngineError> {
        let existing: BTreeSet<String> = match self.retried("list_fields", || dest.list_fields()) {
            Ok(keys) => keys.into_iter().collect(),
            Err(e) if e.kind == PlatformErrorKind::Unsupported => return Ok(()),
            Err(e) => {
                let e = abort_on_auth(e)?;
                report.warn(Warning::new(
                    WarningKind::MissingField,
                    format!("could not list destination fields: {e}"),
                ));
                return Ok(());
            }
        };
        let fields = &self.config.fields;
        let wanted = std::iter::once(&fields.origin_field).chain(fields.map.iter().map(|m| &m.destination));
        for key in wanted.filter(|k| !existing.contains(*k)) {
            if self.dry_run {
                tracing::info!("[dry-run] would create field '{key}'");
                continue;
            }
            match self.retried("create_field", || dest.create_field(key)) {
                Ok(()) => tracing::info!("created field '{key}'"),
                Err(e) => {
                    let e = abort_on_auth(e)?;
                    return Err(EngineError::Structural(format!(
                        "could not create field '{key}': {e}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn observe(
        &self,
        exec: &mut Executor<'_>,
        email: &Email,
        list: Option<&ListId>,
        report: &mut RunReport,
    ) -> Result<Option<Option<DestinationRecord>>, EngineError> {
        match exec.observe(email) {
            Ok(found) => Ok(Some(found)),
            Err(e) => {
                let e = abort_on_auth(e)?;
                let mut warning = Warning::new(
                    WarningKind::LookupFailed,
                    format!("{email}: lookup failed, skipped this pass: {e}"),
                )
                .contact(email.as_str());
                if let Some(list) = list {
                    warning = warning.list(list);
                }
                report.warn(warning);
                Ok(None)
            }
        }
    }

    fn sync_members(
        &self,
        snapshot: &ListSnapshot,
        state: &DesiredState,
        managed: &BTreeSet<TagName>,
        failed: &BTreeSet<ListId>,
        exec: &mut Executor<'_>,
        report: &mut RunReport,
    ) -> Result<(), EngineError> {
        let list = &snapshot.list;
        let Some(members) = state.members.get(list) else {
            return Ok(());
        };
        let opts = self.plan_options();
        for email in members {
            let Some(contact) = state.contacts.get(email) else {
                continue;
            };
            let Some(observed) = self.observe(exec, email, Some(list), report)? else {
                continue;
            };
            let fields = state.fields_for(email, observed.as_ref(), failed, &self.config.fields.origin_field);
            let target = ContactTarget::member(email.clone(), contact.tags.clone(), managed.clone(), fields);
            let opts = match observed.as_ref() {
                Some(record) if self.is_exiting(record) => {
                    tracing::debug!("{email}: carries an exit tag, status left alone");
                    PlanOptions {
                        force_subscribe: false,
                        ..opts
                    }
                }
                _ => opts,
            };
            let plan = planner::plan(&target, observed.as_ref(), &opts);
            exec.execute(Some(list), plan, report)?;
        }
        Ok(())
    }

    /// Retract this list's managed tags from records that are not its members.
    ///
    /// A contact absent from every list is left to archival when the gate is
    /// open, since archiving supersedes tag changes.
    #[allow(clippy::too_many_arguments)]
    fn retract_stale(
        &self,
        dest: &dyn DestinationMutator,
        snapshot: &ListSnapshot,
        state: &DesiredState,
        managed: &BTreeSet<TagName>,
        failed: &BTreeSet<ListId>,
        archival_open: bool,
        exec: &mut Executor<'_>,
        report: &mut RunReport,
    ) -> Result<(), EngineError> {
        let list = &snapshot.list;
        let members = state.members.get(list);
        let mut stale: BTreeMap<Email, (DestinationRecord, BTreeSet<TagName>)> = BTreeMap::new();

        for tag in managed {
            for record in dest.members_with_tag(tag) {
                let record = match record {
                    Ok(record) => record,
                    Err(e) => {
                        let e = abort_on_auth(e)?;
                        report.warn(
                            Warning::new(
                                WarningKind::ListFetchFailed,
                                format!("members of tag '{tag}' could not be listed: {e}"),
                            )
                            .list(list),
                        );
                        break;
                    }
                };
                if members.is_some_and(|m| m.contains(&record.email)) {
                    continue;
                }
                stale
                    .entry(record.email.clone())
                    .or_insert_with(|| (record, BTreeSet::new()))
                    .1
                    .insert(tag.clone());
            }
        }

        let opts = self.plan_options();
        for (email, (record, tags)) in stale {
            let tracked = state.contacts.get(&email);
            if tracked.is_none()
                && archival_open
                && !self.config.archival.is_exempt(record.tags.iter())
            {
                continue;
            }
            exec.remember(&email, &record.id);
            let target = ContactTarget {
                email: email.clone(),
                presence: Presence::NotMember,
                tags: tracked.map(|c| c.tags.clone()).unwrap_or_default(),
                managed: tags,
                fields: if tracked.is_some() {
                    state.fields_for(&email, Some(&record), failed, &self.config.fields.origin_field)
                } else {
                    Fields::new()
                },
            };
            let plan = planner::plan(&target, Some(&record), &opts);
            exec.execute(Some(list), plan, report)?;
        }
        Ok(())
    }

    /// Record retired tags of this list that no live record carries any more,
    /// so later passes stop scanning for them.
    fn clear_retired(
        &self,
        dest: &dyn DestinationMutator,
        snapshot: &ListSnapshot,
        retired: BTreeSet<&TagName>,
    ) -> Result<(), EngineError> {
        for tag in retired {
            let mut carried = false;
            for record in dest.members_with_tag(tag) {
                match record {
                    Ok(record) if record.status == Some(ContactStatus::Archived) => {}
                    Ok(_) => carried = true,
                    Err(e) => {
                        let e = abort_on_auth(e)?;
                        tracing::debug!("retired tag '{tag}' could not be checked: {e}");
                        carried = true;
                    }
                }
                if carried {
                    break;
                }
            }
            if !carried {
                tracing::info!("list {}: retired tag '{tag}' is clear", snapshot.list);
                let entry = history::cleared(&snapshot.list, tag, &snapshot.name, Utc::now());
                history::append_at(self.state_dir, &entry)?;
            }
        }
        Ok(())
    }

    /// Archive every destination record no list accounts for any more.
    fn archive_absent(
        &self,
        dest: &dyn DestinationMutator,
        state: &DesiredState,
        managed: &BTreeSet<TagName>,
        exec: &mut Executor<'_>,
        report: &mut RunReport,
    ) -> Result<(), EngineError> {
        let origin_field = &self.config.fields.origin_field;
        let mut summary = ArchivalSummary {
            ran: true,
            ..ArchivalSummary::default()
        };
        let mut candidates = Vec::new();

        for record in dest.list_all_records() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    let e = abort_on_auth(e)?;
                    report.warn(Warning::new(
                        WarningKind::ListFetchFailed,
                        format!("destination records could not be listed: {e}"),
                    ));
                    summary.skipped_reason = Some(format!("record listing failed: {e}"));
                    break;
                }
            };
            if state.is_tracked(&record.email)
                || record.status == Some(ContactStatus::Archived)
            {
                continue;
            }
            let synced = record.tags.iter().any(|t| managed.contains(t))
                || record.fields.get(origin_field).is_some_and(|v| !v.trim().is_empty());
            if !synced {
                continue;
            }
            if self.config.archival.is_exempt(record.tags.iter()) {
                tracing::debug!("{}: exempt from archival", record.email);
                summary.exempt += 1;
                continue;
            }
            candidates.push(record);
        }

        summary.candidates = candidates.len();
        tracing::info!("archival: {} candidate(s), {} exempt", summary.candidates, summary.exempt);
        let opts = self.plan_options();
        for record in candidates {
            exec.remember(&record.email, &record.id);
            let plan = planner::plan(&ContactTarget::absent(record.email.clone()), Some(&record), &opts);
            exec.execute(None, plan, report)?;
        }
        report.archival = summary;
        Ok(())
    }

    // ----- reverse -----

    fn reverse(
        &self,
        source: &dyn SourceLister,
        crm: &dyn DestinationMutator,
        audience: &dyn DestinationMutator,
        report: &mut RunReport,
    ) -> Result<(), EngineError> {
        let reverse = &self.config.reverse;
        if !reverse.enabled {
            tracing::debug!("reverse half-cycle disabled");
            return Ok(());
        }
        tracing::info!("reverse: {} exit tag(s)", reverse.exit_tags.len());

        let mut snapshots = Vec::new();
        for exit_tag in reverse.exit_tags.keys() {
            let list = ListId::from(exit_tag.as_str());
            match self.snapshot(source, &list, |_| exit_tag.clone()) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    let e = abort_on_auth(e)?;
                    self.list_failed(Direction::Reverse, &list, &e, report);
                }
            }
        }

        let mut state = desired::compute_reverse(&snapshots, reverse, &self.config.fields);
        for warning in std::mem::take(&mut state.warnings) {
            report.warn(warning);
        }

        let opts = PlanOptions {
            force_subscribe: false,
            create_status: None,
            retract: true,
        };
        let mut crm_exec = Executor::new(crm, self.clock, self.policy.clone(), Direction::Reverse, self.dry_run);
        let mut audience_exec =
            Executor::new(audience, self.clock, self.policy.clone(), Direction::Reverse, self.dry_run);

        for target in state.targets.values() {
            let email = &target.email;
            let entry_list = target.join.iter().next();
            let Some(observed) = self.observe(&mut crm_exec, email, entry_list, report)? else {
                continue;
            };
            let as_tags = |lists: &BTreeSet<ListId>| -> BTreeSet<TagName> {
                lists.iter().map(|l| TagName::from(l.as_str())).collect()
            };
            let mut managed = as_tags(&target.join);
            managed.extend(as_tags(&target.leave));
            let fields = if observed.is_none() {
                target.properties.clone()
            } else {
                Fields::new()
            };
            let crm_target = ContactTarget::member(email.clone(), as_tags(&target.join), managed, fields);
            let plan = planner::plan(&crm_target, observed.as_ref(), &opts);
            if !plan.is_empty() {
                tracing::info!(
                    "{email}: exit via {:?} -> join {:?}, leave {:?}",
                    target.exit_tags,
                    target.join,
                    target.leave
                );
            }
            let failures = crm_exec.execute(entry_list, plan, report)?;

            if reverse.archive_exit_contacts {
                if failures > 0 {
                    tracing::warn!("{email}: CRM move incomplete, not archiving on the audience");
                    continue;
                }
                let record = audience_record(email, &target.audience);
                audience_exec.remember(email, &record.id);
                let plan = planner::plan(&ContactTarget::absent(email.clone()), Some(&record), &opts);
                audience_exec.execute(entry_list, plan, report)?;
            }
        }

        for snapshot in &snapshots {
            report.lists.push(ListSummary {
                direction: Direction::Reverse,
                list: snapshot.list.clone(),
                name: Some(snapshot.name.clone()),
                tag: Some(snapshot.tag.clone()),
                members: snapshot.contacts.len(),
                status: ListStatus::Synced,
                error: None,
            });
        }
        Ok(())
    }
}

/// The audience-side record of an exit contact, as read in this pass.
fn audience_record(email: &Email, contact: &SourceContact) -> DestinationRecord {
    DestinationRecord {
        id: RecordId::from(contact.member_id.as_str()),
        email: email.clone(),
        status: contact.status,
        tags: contact.tags.clone(),
        fields: contact.properties.clone(),
    }
}
