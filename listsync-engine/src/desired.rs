//! Desired-state computation.
//!
//! Turns fetched list snapshots into the tags, fields and origin lists every
//! contact should carry. Pure: no platform calls, no I/O.

use std::collections::{BTreeMap, BTreeSet};

use listsync_core::config::{FieldMapping, FieldsConfig, ReverseConfig};
use listsync_core::{
    format_origin, DestinationRecord, Email, Fields, ListId, MemberId, SourceContact, TagName,
};

use crate::report::{Warning, WarningKind};

/// The members of one list (or, in reverse, of one exit tag) as fetched this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSnapshot {
    pub list: ListId,
    pub name: String,
    pub tag: TagName,
    pub contacts: Vec<SourceContact>,
}

/// Tag for a list: its override, else its current name, else `list_<id>`.
pub fn tag_for(list: &ListId, name: &str, overrides: &BTreeMap<ListId, TagName>) -> TagName {
    if let Some(tag) = overrides.get(list) {
        return tag.clone();
    }
    let name = name.trim();
    if name.is_empty() {
        TagName(format!("list_{list}"))
    } else {
        TagName::from(name)
    }
}

/// Cut `value` to at most `max` characters. Returns whether anything was cut.
pub fn truncate(value: &str, max: usize) -> (String, bool) {
    match value.char_indices().nth(max) {
        Some((idx, _)) => (value[..idx].to_owned(), true),
        None => (value.to_owned(), false),
    }
}

/// Copy mapped source properties into destination fields. Blank values are
/// left out so they never overwrite data on the destination.
fn map_fields(
    properties: &BTreeMap<String, String>,
    map: &[FieldMapping],
    email: &Email,
    warnings: &mut Vec<Warning>,
) -> Fields {
    let mut fields = Fields::new();
    for mapping in map {
        let Some(raw) = properties.get(&mapping.source) else {
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let (value, cut) = truncate(raw, mapping.max_len);
        if cut {
            warnings.push(
                Warning::new(
                    WarningKind::Truncated,
                    format!(
                        "{}: {} truncated from {} to {} characters",
                        email,
                        mapping.destination,
                        raw.chars().count(),
                        mapping.max_len
                    ),
                )
                .contact(email.as_str()),
            );
        }
        fields.insert(mapping.destination.clone(), value);
    }
    fields
}

/// Validate a contact's email, recording why it was rejected.
fn contact_email(contact: &SourceContact, list: &ListId, warnings: &mut Vec<Warning>) -> Option<Email> {
    let Some(raw) = contact.email.as_deref() else {
        warnings.push(
            Warning::new(
                WarningKind::MissingEmail,
                format!("member {} of list {list} has no email", contact.member_id),
            )
            .list(list)
            .contact(contact.member_id.as_str()),
        );
        return None;
    };
    match Email::parse(raw) {
        Ok(email) => Some(email),
        Err(e) => {
            warnings.push(
                Warning::new(
                    WarningKind::InvalidEmail,
                    format!("member {} of list {list}: {e}", contact.member_id),
                )
                .list(list)
                .contact(contact.member_id.as_str()),
            );
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Forward
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredContact {
    pub email: Email,
    pub lists: BTreeSet<ListId>,
    pub tags: BTreeSet<TagName>,
    /// Mapped fields, without the origin field.
    pub fields: Fields,
}

#[derive(Debug, Default)]
pub struct DesiredState {
    pub contacts: BTreeMap<Email, DesiredContact>,
    /// Valid, non-excluded members per list.
    pub members: BTreeMap<ListId, BTreeSet<Email>>,
    pub warnings: Vec<Warning>,
}

impl DesiredState {
    pub fn is_tracked(&self, email: &Email) -> bool {
        self.contacts.contains_key(email)
    }

    pub fn tracked(&self) -> impl Iterator<Item = &Email> {
        self.contacts.keys()
    }

    /// Fields `email` should carry on the destination, origin field included.
    ///
    /// Origin lists that failed to fetch this pass cannot be confirmed either
    /// way, so whatever the record already says about them is kept.
    pub fn fields_for(
        &self,
        email: &Email,
        observed: Option<&DestinationRecord>,
        failed_lists: &BTreeSet<ListId>,
        origin_field: &str,
    ) -> Fields {
        let Some(contact) = self.contacts.get(email) else {
            return Fields::new();
        };
        let mut origin = contact.lists.clone();
        if let Some(record) = observed {
            origin.extend(
                record
                    .origin_lists(origin_field)
                    .into_iter()
                    .filter(|l| failed_lists.contains(l)),
            );
        }
        let mut fields = contact.fields.clone();
        fields.insert(origin_field.to_owned(), format_origin(&origin));
        fields
    }
}

/// Union every snapshot into one desired state.
///
/// Contacts without a valid email or belonging to a hard-exclude list are left
/// out with a warning. A contact in several lists gets every list's tag.
pub fn compute(
    snapshots: &[ListSnapshot],
    excluded: &BTreeSet<MemberId>,
    fields: &FieldsConfig,
) -> DesiredState {
    let mut state = DesiredState::default();
    let mut excluded_seen: BTreeSet<&MemberId> = BTreeSet::new();

    for snapshot in snapshots {
        let members = state.members.entry(snapshot.list.clone()).or_default();
        for contact in &snapshot.contacts {
            if excluded.contains(&contact.member_id) {
                if excluded_seen.insert(&contact.member_id) {
                    state.warnings.push(
                        Warning::new(
                            WarningKind::HardExcluded,
                            format!("member {} is on a hard-exclude list", contact.member_id),
                        )
                        .list(&snapshot.list)
                        .contact(contact.member_id.as_str()),
                    );
                }
                continue;
            }
            let Some(email) = contact_email(contact, &snapshot.list, &mut state.warnings) else {
                continue;
            };
            members.insert(email.clone());

            let warnings = &mut state.warnings;
            let entry = state.contacts.entry(email.clone()).or_insert_with(|| DesiredContact {
                email: email.clone(),
                lists: BTreeSet::new(),
                tags: BTreeSet::new(),
                fields: map_fields(&contact.properties, &fields.map, &email, warnings),
            });
            entry.lists.insert(snapshot.list.clone());
            entry.tags.insert(snapshot.tag.clone());
        }
    }
    state
}

// ---------------------------------------------------------------------------
// Reverse
// ---------------------------------------------------------------------------

/// What the CRM should look like for one exit-tagged contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitTarget {
    pub email: Email,
    /// Exit tags the contact carries.
    pub exit_tags: BTreeSet<TagName>,
    /// CRM lists the contact must join.
    pub join: BTreeSet<ListId>,
    /// Source lists the contact came from.
    pub origin: BTreeSet<ListId>,
    /// Source lists the contact must leave under the exclusion rules.
    pub leave: BTreeSet<ListId>,
    /// CRM properties for a contact the CRM does not know yet.
    pub properties: Fields,
    /// The audience-side contact, for archival after the move.
    pub audience: SourceContact,
}

#[derive(Debug, Default)]
pub struct ReverseState {
    pub targets: BTreeMap<Email, ExitTarget>,
    pub warnings: Vec<Warning>,
}

/// Map exit-tag snapshots to CRM list moves.
///
/// Each snapshot's `tag` is the exit tag; contacts in several exit snapshots
/// join the union of the mapped lists.
pub fn compute_reverse(
    snapshots: &[ListSnapshot],
    reverse: &ReverseConfig,
    fields: &FieldsConfig,
) -> ReverseState {
    let mut state = ReverseState::default();

    for snapshot in snapshots {
        let Some(target_list) = reverse.exit_tags.get(&snapshot.tag) else {
            continue;
        };
        for contact in &snapshot.contacts {
            let Some(email) = contact_email(contact, &snapshot.list, &mut state.warnings) else {
                continue;
            };
            let target = state.targets.entry(email.clone()).or_insert_with(|| ExitTarget {
                email: email.clone(),
                exit_tags: BTreeSet::new(),
                join: BTreeSet::new(),
                origin: contact.origin_lists.clone(),
                leave: BTreeSet::new(),
                properties: reverse_properties(&contact.properties, &fields.map),
                audience: contact.clone(),
            });
            target.exit_tags.insert(snapshot.tag.clone());
            target.join.insert(target_list.clone());
        }
    }

    for target in state.targets.values_mut() {
        target.leave = target
            .origin
            .iter()
            .filter(|source| {
                reverse
                    .exclusion_rules
                    .get(*source)
                    .is_some_and(|excl| excl.iter().any(|l| target.join.contains(l)))
            })
            .cloned()
            .collect();
    }
    state
}

/// Destination fields back to source property names.
fn reverse_properties(properties: &BTreeMap<String, String>, map: &[FieldMapping]) -> Fields {
    map.iter()
        .filter_map(|m| {
            let value = properties.get(&m.destination)?.trim();
            (!value.is_empty()).then(|| (m.source.clone(), value.to_owned()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use listsync_core::RecordId;

    fn contact(id: &str, email: Option<&str>) -> SourceContact {
        SourceContact {
            member_id: id.into(),
            email: email.map(String::from),
            ..Default::default()
        }
    }

    fn snapshot(list: &str, tag: &str, contacts: Vec<SourceContact>) -> ListSnapshot {
        ListSnapshot {
            list: list.into(),
            name: tag.into(),
            tag: tag.into(),
            contacts,
        }
    }

    #[test]
    fn tag_naming_rule() {
        let mut overrides = BTreeMap::new();
        overrides.insert(ListId::from("2"), TagName::from("Fixed"));
        assert_eq!(tag_for(&"1".into(), "General", &overrides), TagName::from("General"));
        assert_eq!(tag_for(&"2".into(), "Renamed", &overrides), TagName::from("Fixed"));
        assert_eq!(tag_for(&"3".into(), "  ", &overrides), TagName::from("list_3"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), ("hé".to_string(), true));
        assert_eq!(truncate("abc", 3), ("abc".to_string(), false));
    }

    #[test]
    fn union_of_tags_across_lists() {
        let snaps = vec![
            snapshot("1", "General", vec![contact("a", Some("Alice@x.com")), contact("b", Some("bob@x.com"))]),
            snapshot("2", "Newsletter", vec![contact("b2", Some("BOB@x.com"))]),
        ];
        let state = compute(&snaps, &BTreeSet::new(), &FieldsConfig::default());

        let bob = &state.contacts[&Email::parse("bob@x.com").unwrap()];
        assert_eq!(bob.tags.len(), 2);
        assert_eq!(bob.lists.len(), 2);
        let alice = &state.contacts[&Email::parse("alice@x.com").unwrap()];
        assert_eq!(alice.tags, BTreeSet::from([TagName::from("General")]));
        assert_eq!(state.members[&ListId::from("1")].len(), 2);
    }

    #[test]
    fn invalid_and_missing_emails_are_warned_and_skipped() {
        let snaps = vec![snapshot(
            "1",
            "General",
            vec![contact("a", None), contact("b", Some("not-an-email")), contact("c", Some("c@x.com"))],
        )];
        let state = compute(&snaps, &BTreeSet::new(), &FieldsConfig::default());
        assert_eq!(state.contacts.len(), 1);
        let kinds: Vec<_> = state.warnings.iter().map(|w| w.kind).collect();
        assert_eq!(kinds, vec![WarningKind::MissingEmail, WarningKind::InvalidEmail]);
    }

    #[test]
    fn hard_excluded_members_are_dropped_once() {
        let snaps = vec![
            snapshot("1", "A", vec![contact("x", Some("x@x.com"))]),
            snapshot("2", "B", vec![contact("x", Some("x@x.com"))]),
        ];
        let excluded = BTreeSet::from([MemberId::from("x")]);
        let state = compute(&snaps, &excluded, &FieldsConfig::default());
        assert!(state.contacts.is_empty());
        assert_eq!(state.warnings.len(), 1);
        assert_eq!(state.warnings[0].kind, WarningKind::HardExcluded);
    }

    #[test]
    fn fields_are_mapped_and_truncated() {
        let mut c = contact("a", Some("a@x.com"));
        c.properties.insert("firstname".into(), "Ann".into());
        c.properties.insert("zip".into(), "1".repeat(25));
        c.properties.insert("company".into(), "   ".into());
        let state = compute(&[snapshot("1", "T", vec![c])], &BTreeSet::new(), &FieldsConfig::default());

        let fields = &state.contacts[&Email::parse("a@x.com").unwrap()].fields;
        assert_eq!(fields["FNAME"], "Ann");
        assert_eq!(fields["POSTCODE"].len(), 20);
        assert!(!fields.contains_key("COMPANY"));
        assert_eq!(state.warnings[0].kind, WarningKind::Truncated);
    }

    #[test]
    fn origin_field_keeps_unconfirmed_lists() {
        let snaps = vec![snapshot("1", "A", vec![contact("a", Some("a@x.com"))])];
        let state = compute(&snaps, &BTreeSet::new(), &FieldsConfig::default());
        let email = Email::parse("a@x.com").unwrap();

        let mut observed_fields = Fields::new();
        observed_fields.insert("ORI_LISTS".into(), "1,2,3".into());
        let observed = DestinationRecord {
            id: RecordId::from("r"),
            email: email.clone(),
            status: None,
            tags: BTreeSet::new(),
            fields: observed_fields,
        };
        let failed = BTreeSet::from([ListId::from("3")]);
        let fields = state.fields_for(&email, Some(&observed), &failed, "ORI_LISTS");
        assert_eq!(fields["ORI_LISTS"], "1,3");
    }

    #[test]
    fn reverse_joins_and_leaves_by_exclusion_rules() {
        let mut reverse = ReverseConfig::default();
        reverse.exit_tags.insert("Exit_Customer".into(), "900".into());
        reverse.exclusion_rules.insert("718".into(), vec!["900".into()]);
        reverse.exclusion_rules.insert("719".into(), vec!["901".into()]);

        let mut c = contact("h1", Some("carol@x.com"));
        c.origin_lists = BTreeSet::from([ListId::from("718"), ListId::from("719")]);
        c.properties.insert("FNAME".into(), "Carol".into());
        let snaps = vec![snapshot("Exit_Customer", "Exit_Customer", vec![c])];

        let state = compute_reverse(&snaps, &reverse, &FieldsConfig::default());
        let t = &state.targets[&Email::parse("carol@x.com").unwrap()];
        assert_eq!(t.join, BTreeSet::from([ListId::from("900")]));
        assert_eq!(t.leave, BTreeSet::from([ListId::from("718")]));
        assert_eq!(t.properties["firstname"], "Carol");
    }
}
