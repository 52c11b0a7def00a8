//! Diff/mutation planner.
//!
//! Compares one contact's target with its observed destination record and
//! emits the ordered, idempotent mutations that close the gap:
//!
//! ```text
//! RemoveTag* → Create → Update → SetStatus → ApplyTag*
//! ```
//!
//! A converged contact yields an empty plan, so planning twice against the
//! result of the first plan is a no-op.

use std::collections::BTreeSet;

use listsync_core::{ContactStatus, DestinationRecord, Email, Fields, Mutation, TagName};

/// Where the contact stands relative to the scope being planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// In scope: create if needed, then converge tags, fields and status.
    Member,
    /// Known elsewhere but not in this scope: retractions only, never a create.
    NotMember,
    /// Confirmed absent from every source list: archive.
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactTarget {
    pub email: Email,
    pub presence: Presence,
    /// Tags that should be present.
    pub tags: BTreeSet<TagName>,
    /// Tags this plan may retract. Tags outside it are never touched.
    pub managed: BTreeSet<TagName>,
    /// Field values to converge. Keys missing here are left alone.
    pub fields: Fields,
}

impl ContactTarget {
    pub fn member(email: Email, tags: BTreeSet<TagName>, managed: BTreeSet<TagName>, fields: Fields) -> Self {
        Self {
            email,
            presence: Presence::Member,
            tags,
            managed,
            fields,
        }
    }

    pub fn not_member(email: Email, managed: BTreeSet<TagName>) -> Self {
        Self {
            email,
            presence: Presence::NotMember,
            tags: BTreeSet::new(),
            managed,
            fields: Fields::new(),
        }
    }

    pub fn absent(email: Email) -> Self {
        Self {
            email,
            presence: Presence::Absent,
            tags: BTreeSet::new(),
            managed: BTreeSet::new(),
            fields: Fields::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOptions {
    /// Re-subscribe members whose known status is anything but subscribed.
    pub force_subscribe: bool,
    /// Status given to newly created records.
    pub create_status: Option<ContactStatus>,
    /// Emit `RemoveTag` for stale managed tags.
    pub retract: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            force_subscribe: true,
            create_status: Some(ContactStatus::Subscribed),
            retract: true,
        }
    }
}

/// Fields in `desired` whose value differs from (or is missing in) `observed`.
pub fn changed_fields(desired: &Fields, observed: &Fields) -> Fields {
    desired
        .iter()
        .filter(|(k, v)| observed.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Plan one contact.
pub fn plan(
    target: &ContactTarget,
    observed: Option<&DestinationRecord>,
    opts: &PlanOptions,
) -> Vec<Mutation> {
    let email = &target.email;
    let mut plan = Vec::new();

    match (target.presence, observed) {
        (Presence::Absent, Some(record)) => {
            if record.status != Some(ContactStatus::Archived) {
                plan.push(Mutation::Archive {
                    contact: email.clone(),
                });
            }
        }
        // Nothing to archive, and never create a record only to retract from it.
        (Presence::Absent, None) | (Presence::NotMember, None) => {}

        (Presence::NotMember, Some(record)) => {
            push_removals(&mut plan, target, record, opts);
            push_update(&mut plan, target, record);
        }

        (Presence::Member, None) => {
            plan.push(Mutation::Create {
                contact: email.clone(),
                fields: target.fields.clone(),
                status: opts.create_status,
            });
            for tag in &target.tags {
                plan.push(Mutation::ApplyTag {
                    contact: email.clone(),
                    tag: tag.clone(),
                });
            }
        }

        (Presence::Member, Some(record)) => {
            push_removals(&mut plan, target, record, opts);
            push_update(&mut plan, target, record);
            if opts.force_subscribe {
                if let Some(status) = record.status.filter(|s| *s != ContactStatus::Subscribed) {
                    tracing::debug!("{email}: {status} -> subscribed");
                    plan.push(Mutation::SetStatus {
                        contact: email.clone(),
                        status: ContactStatus::Subscribed,
                    });
                }
            }
            for tag in target.tags.difference(&record.tags) {
                plan.push(Mutation::ApplyTag {
                    contact: email.clone(),
                    tag: tag.clone(),
                });
            }
        }
    }
    plan
}

fn push_removals(
    plan: &mut Vec<Mutation>,
    target: &ContactTarget,
    record: &DestinationRecord,
    opts: &PlanOptions,
) {
    if !opts.retract {
        return;
    }
    for tag in record.tags.intersection(&target.managed) {
        if !target.tags.contains(tag) {
            plan.push(Mutation::RemoveTag {
                contact: target.email.clone(),
                tag: tag.clone(),
            });
        }
    }
}

fn push_update(plan: &mut Vec<Mutation>, target: &ContactTarget, record: &DestinationRecord) {
    let changed = changed_fields(&target.fields, &record.fields);
    if !changed.is_empty() {
        plan.push(Mutation::Update {
            contact: target.email.clone(),
            fields: changed,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use listsync_core::{MutationKind, RecordId};

    fn email(s: &str) -> Email {
        Email::parse(s).unwrap()
    }

    fn tags(names: &[&str]) -> BTreeSet<TagName> {
        names.iter().map(|n| TagName::from(*n)).collect()
    }

    fn record(tag_names: &[&str], status: ContactStatus) -> DestinationRecord {
        DestinationRecord {
            id: RecordId::from("r1"),
            email: email("a@x.com"),
            status: Some(status),
            tags: tags(tag_names),
            fields: Fields::new(),
        }
    }

    fn kinds(plan: &[Mutation]) -> Vec<MutationKind> {
        plan.iter().map(Mutation::kind).collect()
    }

    #[test]
    fn new_member_is_created_then_tagged() {
        let target = ContactTarget::member(email("a@x.com"), tags(&["General"]), tags(&["General"]), Fields::new());
        let plan = plan(&target, None, &PlanOptions::default());
        assert_eq!(kinds(&plan), vec![MutationKind::Create, MutationKind::ApplyTag]);
        assert!(matches!(
            &plan[0],
            Mutation::Create { status: Some(ContactStatus::Subscribed), .. }
        ));
    }

    #[test]
    fn removals_precede_everything_else() {
        let mut target = ContactTarget::member(
            email("a@x.com"),
            tags(&["New"]),
            tags(&["New", "Old"]),
            Fields::new(),
        );
        target.fields.insert("FNAME".into(), "Ann".into());
        let observed = record(&["Old", "VIP"], ContactStatus::Unsubscribed);

        let plan = plan(&target, Some(&observed), &PlanOptions::default());
        assert_eq!(
            kinds(&plan),
            vec![
                MutationKind::RemoveTag,
                MutationKind::Update,
                MutationKind::SetStatus,
                MutationKind::ApplyTag
            ]
        );
    }

    #[test]
    fn unmanaged_tags_are_never_removed() {
        let target = ContactTarget::member(email("a@x.com"), tags(&["General"]), tags(&["General"]), Fields::new());
        let observed = record(&["General", "Event_Summit"], ContactStatus::Subscribed);
        assert!(plan(&target, Some(&observed), &PlanOptions::default()).is_empty());
    }

    #[test]
    fn not_member_without_record_plans_nothing() {
        let target = ContactTarget::not_member(email("a@x.com"), tags(&["General"]));
        assert!(plan(&target, None, &PlanOptions::default()).is_empty());
    }

    #[test]
    fn not_member_retracts_only() {
        let target = ContactTarget::not_member(email("a@x.com"), tags(&["General"]));
        let observed = record(&["General"], ContactStatus::Unsubscribed);
        let plan = plan(&target, Some(&observed), &PlanOptions::default());
        assert_eq!(kinds(&plan), vec![MutationKind::RemoveTag]);
    }

    #[test]
    fn absent_archives_once() {
        let target = ContactTarget::absent(email("a@x.com"));
        let live = record(&["General"], ContactStatus::Subscribed);
        let gone = record(&[], ContactStatus::Archived);
        assert_eq!(kinds(&plan(&target, Some(&live), &PlanOptions::default())), vec![MutationKind::Archive]);
        assert!(plan(&target, Some(&gone), &PlanOptions::default()).is_empty());
        assert!(plan(&target, None, &PlanOptions::default()).is_empty());
    }

    #[test]
    fn retraction_can_be_disabled() {
        let target = ContactTarget::not_member(email("a@x.com"), tags(&["General"]));
        let observed = record(&["General"], ContactStatus::Subscribed);
        let opts = PlanOptions {
            retract: false,
            ..PlanOptions::default()
        };
        assert!(plan(&target, Some(&observed), &opts).is_empty());
    }

    #[test]
    fn only_changed_fields_are_updated() {
        let mut desired = Fields::new();
        desired.insert("FNAME".into(), "Ann".into());
        desired.insert("CITY".into(), "Oslo".into());
        let mut observed = Fields::new();
        observed.insert("FNAME".into(), "Ann".into());
        observed.insert("LNAME".into(), "Lee".into());

        let changed = changed_fields(&desired, &observed);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed["CITY"], "Oslo");
    }

    #[test]
    fn converged_contact_plans_nothing() {
        let mut target = ContactTarget::member(email("a@x.com"), tags(&["A", "B"]), tags(&["A", "B"]), Fields::new());
        target.fields.insert("ORI_LISTS".into(), "1,2".into());
        let mut observed = record(&["A", "B"], ContactStatus::Subscribed);
        observed.fields.insert("ORI_LISTS".into(), "1,2".into());
        assert!(plan(&target, Some(&observed), &PlanOptions::default()).is_empty());
    }
}
