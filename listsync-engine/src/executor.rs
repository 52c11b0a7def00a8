//! Mutation executor with retry/backoff.
//!
//! Applies planned mutations one at a time through a [`DestinationMutator`].
//! Transient failures are retried with backoff and then recorded as permanent
//! failures; the queue keeps going. Only authentication failures and
//! unrepairable schema errors stop it.

use std::collections::{BTreeSet, HashMap, HashSet};

use listsync_core::{
    DestinationRecord, Email, ListId, Mutation, MutationOutcome, NewRecord, RecordId, TagName,
    TagRef,
};

use crate::clock::Clock;
use crate::error::{EngineError, PlatformError, PlatformErrorKind};
use crate::platform::DestinationMutator;
use crate::report::{Direction, MutationRecord, RunReport};
use crate::retry::{Exhausted, RetryPolicy};

enum Step<T> {
    Done(T, u32),
    Failed(MutationOutcome, PlatformErrorKind),
}

enum Lookup {
    Found(RecordId),
    Missing,
    Failed(MutationOutcome, PlatformErrorKind),
}

/// Result of one mutation, with the error class when it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub outcome: MutationOutcome,
    pub error_kind: Option<PlatformErrorKind>,
}

impl Applied {
    fn ok(outcome: MutationOutcome) -> Self {
        Self {
            outcome,
            error_kind: None,
        }
    }
}

pub struct Executor<'a> {
    dest: &'a dyn DestinationMutator,
    clock: &'a dyn Clock,
    policy: RetryPolicy,
    direction: Direction,
    dry_run: bool,
    /// Record ids learned this run, so every operation on an email goes
    /// through the same record.
    ids: HashMap<Email, RecordId>,
    /// Contacts whose create failed; later mutations for them are skipped.
    uncreated: HashSet<Email>,
    remediated: BTreeSet<String>,
}

impl<'a> Executor<'a> {
    pub fn new(
        dest: &'a dyn DestinationMutator,
        clock: &'a dyn Clock,
        policy: RetryPolicy,
        direction: Direction,
        dry_run: bool,
    ) -> Self {
        Self {
            dest,
            clock,
            policy,
            direction,
            dry_run,
            ids: HashMap::new(),
            uncreated: HashSet::new(),
            remediated: BTreeSet::new(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Seed the id cache from an observation made by the caller.
    pub fn remember(&mut self, email: &Email, id: &RecordId) {
        self.ids.insert(email.clone(), id.clone());
    }

    pub fn record_id(&self, email: &Email) -> Option<&RecordId> {
        self.ids.get(email)
    }

    /// Look a contact up under the retry policy and cache its id.
    ///
    /// Reads are made in dry-run too; only mutations are suppressed.
    pub fn observe(&mut self, email: &Email) -> Result<Option<DestinationRecord>, PlatformError> {
        let dest = self.dest;
        let (found, _) = self
            .policy
            .execute(self.clock, "find_by_email", || dest.find_by_email(email))
            .map_err(|e| e.error)?;
        if let Some(record) = &found {
            self.ids.insert(email.clone(), record.id.clone());
        }
        Ok(found)
    }

    /// Resolve a tag name under the retry policy.
    pub fn find_tag(&self, name: &TagName) -> Result<Option<TagRef>, PlatformError> {
        let dest = self.dest;
        self.policy
            .execute(self.clock, "find_tag", || dest.find_tag(name))
            .map(|(tag, _)| tag)
            .map_err(|e| e.error)
    }

    /// Apply `plan` in order, appending every outcome to `report`.
    ///
    /// Returns the number of permanent failures. An `Err` means the run must
    /// abort; mutations after the failing one are not attempted.
    pub fn execute(
        &mut self,
        list: Option<&ListId>,
        plan: Vec<Mutation>,
        report: &mut RunReport,
    ) -> Result<usize, EngineError> {
        let mut failures = 0;
        for mutation in plan {
            let applied = self.apply(&mutation)?;
            if applied.outcome.is_failure() {
                failures += 1;
                tracing::warn!("{mutation}: {:?}", applied.outcome);
            } else {
                tracing::debug!("{mutation}: {:?}", applied.outcome);
            }
            report.mutations.push(MutationRecord {
                direction: self.direction,
                list: list.cloned(),
                idempotency_key: mutation.idempotency_key(),
                mutation,
                outcome: applied.outcome,
            });
        }
        Ok(failures)
    }

    /// Apply a single mutation.
    pub fn apply(&mut self, mutation: &Mutation) -> Result<Applied, EngineError> {
        if self.dry_run {
            tracing::info!("[dry-run] would apply: {mutation}");
            return Ok(Applied::ok(MutationOutcome::WouldApply));
        }
        if let Some(contact) = mutation.contact() {
            if self.uncreated.contains(contact) && !matches!(mutation, Mutation::Create { .. }) {
                return Ok(Applied::ok(MutationOutcome::PermanentFailure {
                    attempts: 0,
                    error: format!("no record for {contact}: create failed"),
                }));
            }
        }

        let dest = self.dest;
        match mutation {
            Mutation::Create {
                contact,
                fields,
                status,
            } => {
                // Never create a duplicate: an existing record turns this into an update.
                let id = match self.lookup(contact)? {
                    Lookup::Found(id) => id,
                    Lookup::Failed(outcome, kind) => {
                        self.uncreated.insert(contact.clone());
                        return Ok(failed(outcome, kind));
                    }
                    Lookup::Missing => {
                        let record = NewRecord {
                            email: contact.clone(),
                            fields: fields.clone(),
                            status: *status,
                        };
                        // A failed attempt may still have committed: look again before re-sending.
                        let mut sent = false;
                        let created = self.run(mutation, || {
                            if sent {
                                if let Some(existing) = dest.find_by_email(&record.email)? {
                                    return Ok(existing.id);
                                }
                            }
                            sent = true;
                            dest.create(&record)
                        })?;
                        match created {
                            Step::Done(id, attempts) => {
                                self.ids.insert(contact.clone(), id);
                                return Ok(Applied::ok(outcome_for(attempts)));
                            }
                            Step::Failed(outcome, PlatformErrorKind::Validation) => {
                                match self.lookup(contact)? {
                                    Lookup::Found(id) => id,
                                    _ => {
                                        self.uncreated.insert(contact.clone());
                                        return Ok(failed(outcome, PlatformErrorKind::Validation));
                                    }
                                }
                            }
                            Step::Failed(outcome, kind) => {
                                self.uncreated.insert(contact.clone());
                                return Ok(failed(outcome, kind));
                            }
                        }
                    }
                };
                tracing::debug!("{contact} already exists as {id}; updating instead of creating");
                let mut attempts = 1;
                if !fields.is_empty() {
                    match self.run(mutation, || dest.update(&id, fields))? {
                        Step::Done((), n) => attempts = attempts.max(n),
                        Step::Failed(outcome, kind) => return Ok(failed(outcome, kind)),
                    }
                }
                if let Some(status) = status {
                    match self.run(mutation, || dest.set_subscription_status(&id, *status))? {
                        Step::Done((), n) => attempts = attempts.max(n),
                        Step::Failed(outcome, kind) => return Ok(failed(outcome, kind)),
                    }
                }
                Ok(Applied::ok(outcome_for(attempts)))
            }
            Mutation::Update { contact, fields } => {
                self.with_record(mutation, contact, |id| dest.update(id, fields))
            }
            Mutation::ApplyTag { contact, tag } => {
                self.with_record(mutation, contact, |id| dest.apply_tag(id, tag))
            }
            Mutation::RemoveTag { contact, tag } => {
                self.with_record(mutation, contact, |id| dest.remove_tag(id, tag))
            }
            Mutation::Archive { contact } => {
                self.with_record(mutation, contact, |id| dest.archive(id))
            }
            Mutation::SetStatus { contact, status } => self.with_record(mutation, contact, |id| {
                dest.set_subscription_status(id, *status)
            }),
            Mutation::RenameTag { tag_id, to, .. } => {
                match self.run(mutation, || dest.rename_tag_by_id(tag_id, to))? {
                    Step::Done((), attempts) => Ok(Applied::ok(outcome_for(attempts))),
                    Step::Failed(outcome, kind) => Ok(failed(outcome, kind)),
                }
            }
        }
    }

    /// Resolve the contact's record, then call `f` with its id.
    fn with_record<F>(
        &mut self,
        mutation: &Mutation,
        contact: &Email,
        mut f: F,
    ) -> Result<Applied, EngineError>
    where
        F: FnMut(&RecordId) -> Result<(), PlatformError>,
    {
        let id = match self.lookup(contact)? {
            Lookup::Found(id) => id,
            Lookup::Failed(outcome, kind) => return Ok(failed(outcome, kind)),
            Lookup::Missing => {
                // Removing from or archiving a record that does not exist is already done.
                if tolerates_missing(mutation) {
                    return Ok(Applied::ok(MutationOutcome::Success));
                }
                return Ok(failed(
                    MutationOutcome::PermanentFailure {
                        attempts: 1,
                        error: format!("no record for {contact}"),
                    },
                    PlatformErrorKind::NotFound,
                ));
            }
        };
        match self.run(mutation, || f(&id))? {
            Step::Done((), attempts) => Ok(Applied::ok(outcome_for(attempts))),
            Step::Failed(_, PlatformErrorKind::NotFound) if tolerates_missing(mutation) => {
                Ok(Applied::ok(MutationOutcome::Success))
            }
            Step::Failed(outcome, kind) => Ok(failed(outcome, kind)),
        }
    }

    fn lookup(&mut self, contact: &Email) -> Result<Lookup, EngineError> {
        if let Some(id) = self.ids.get(contact) {
            return Ok(Lookup::Found(id.clone()));
        }
        let dest = self.dest;
        match self.policy.execute(self.clock, "find_by_email", || dest.find_by_email(contact)) {
            Ok((Some(record), _)) => {
                self.ids.insert(contact.clone(), record.id.clone());
                Ok(Lookup::Found(record.id))
            }
            Ok((None, _)) => Ok(Lookup::Missing),
            Err(Exhausted { error, .. }) if error.kind == PlatformErrorKind::Auth => {
                Err(EngineError::Auth(error))
            }
            Err(Exhausted { error, attempts }) => Ok(Lookup::Failed(
                MutationOutcome::PermanentFailure {
                    attempts,
                    error: format!("lookup failed: {error}"),
                },
                error.kind,
            )),
        }
    }

    /// Run `f` under the retry policy, repairing one missing field per key.
    fn run<T, F>(&mut self, mutation: &Mutation, mut f: F) -> Result<Step<T>, EngineError>
    where
        F: FnMut() -> Result<T, PlatformError>,
    {
        let op = mutation.kind().as_str();
        let mut spent = 0;
        loop {
            match self.policy.execute(self.clock, op, &mut f) {
                Ok((value, attempts)) => return Ok(Step::Done(value, spent + attempts)),
                Err(Exhausted { error, attempts }) => {
                    spent += attempts;
                    match error.kind {
                        PlatformErrorKind::Auth => return Err(EngineError::Auth(error)),
                        PlatformErrorKind::MissingField => {
                            self.remediate(&error)?;
                        }
                        kind => {
                            return Ok(Step::Failed(
                                MutationOutcome::PermanentFailure {
                                    attempts: spent,
                                    error: error.to_string(),
                                },
                                kind,
                            ))
                        }
                    }
                }
            }
        }
    }

    /// Create the missing field once. A second miss, or a failed create, is
    /// structural and aborts.
    fn remediate(&mut self, error: &PlatformError) -> Result<(), EngineError> {
        let Some(field) = error.field.clone() else {
            return Err(EngineError::Structural(error.to_string()));
        };
        if self.remediated.contains(&field) {
            return Err(EngineError::Structural(format!(
                "field '{field}' still missing after it was created"
            )));
        }
        let dest = self.dest;
        match self.policy.execute(self.clock, "create_field", || dest.create_field(&field)) {
            Ok(_) => {
                tracing::info!("created missing field '{field}'");
                self.remediated.insert(field);
                Ok(())
            }
            Err(Exhausted { error, .. }) if error.kind == PlatformErrorKind::Auth => {
                Err(EngineError::Auth(error))
            }
            Err(Exhausted { error, .. }) => Err(EngineError::Structural(format!(
                "could not create missing field '{field}': {error}"
            ))),
        }
    }
}

fn outcome_for(attempts: u32) -> MutationOutcome {
    if attempts <= 1 {
        MutationOutcome::Success
    } else {
        MutationOutcome::RetriedSuccess { attempts }
    }
}

fn failed(outcome: MutationOutcome, kind: PlatformErrorKind) -> Applied {
    Applied {
        outcome,
        error_kind: Some(kind),
    }
}

fn tolerates_missing(mutation: &Mutation) -> bool {
    matches!(mutation, Mutation::RemoveTag { .. } | Mutation::Archive { .. })
}
