//! In-memory platforms for tests.
//!
//! [`FakeSource`] stands in for the CRM as a list source. [`FakeDestination`]
//! stands in for the audience (and, with list ids as tags, for the CRM in the
//! reverse half-cycle). Both record every call and accept scripted failures.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use listsync_core::{
    parse_origin, ContactStatus, DestinationRecord, Email, Fields, ListId, MemberId, NewRecord,
    RecordId, SourceContact, TagId, TagName, TagRef,
};

use crate::error::PlatformError;
use crate::pacing::Pacer;
use crate::platform::{DestinationMutator, MembershipPage, RecordStream, SourceLister};

/// Every platform operation, for call counting and failure scripting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    VerifyAccess,
    GetListName,
    ListMemberships,
    FetchDetails,
    FindByEmail,
    Create,
    Update,
    ApplyTag,
    RemoveTag,
    Archive,
    SetStatus,
    ListAll,
    MembersWithTag,
    FindTag,
    RenameTag,
    ListFields,
    CreateField,
}

#[derive(Debug)]
struct Script {
    op: Op,
    error: PlatformError,
    remaining: u32,
}

#[derive(Debug, Default)]
struct Calls {
    log: Vec<Op>,
    scripts: Vec<Script>,
}

impl Calls {
    fn hit(&mut self, op: Op, pacer: Option<&Pacer>) -> Result<(), PlatformError> {
        if let Some(pacer) = pacer {
            pacer.wait();
        }
        self.log.push(op);
        if let Some(script) = self
            .scripts
            .iter_mut()
            .find(|s| s.op == op && s.remaining > 0)
        {
            script.remaining -= 1;
            return Err(script.error.clone());
        }
        Ok(())
    }

    fn count(&self, op: Op) -> usize {
        self.log.iter().filter(|o| **o == op).count()
    }
}

fn page<T: Clone>(items: &[T], cursor: Option<&str>, size: usize) -> (Vec<T>, Option<String>) {
    let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
    let end = (start + size.max(1)).min(items.len());
    let slice = items.get(start..end).unwrap_or_default().to_vec();
    let next = (end < items.len()).then(|| end.to_string());
    (slice, next)
}

// ---------------------------------------------------------------------------
// FakeSource
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SourceState {
    lists: BTreeMap<ListId, (String, Vec<SourceContact>)>,
    broken: BTreeMap<ListId, PlatformError>,
    calls: Calls,
}

/// A CRM-like list source.
#[derive(Debug)]
pub struct FakeSource {
    state: RefCell<SourceState>,
    page_size: usize,
    pacer: Option<Pacer>,
}

impl Default for FakeSource {
    fn default() -> Self {
        Self::new()
    }
}

/// A source contact with an email and a first name.
pub fn contact(member_id: &str, email: &str) -> SourceContact {
    let mut properties = BTreeMap::new();
    properties.insert("email".to_string(), email.to_string());
    SourceContact {
        member_id: MemberId::from(member_id),
        email: Some(email.to_string()),
        properties,
        ..SourceContact::default()
    }
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(SourceState::default()),
            page_size: 2,
            pacer: None,
        }
    }

    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = Some(pacer);
        self
    }

    pub fn add_list(&self, id: &str, name: &str, members: Vec<SourceContact>) {
        self.state
            .borrow_mut()
            .lists
            .insert(ListId::from(id), (name.to_string(), members));
    }

    pub fn rename_list(&self, id: &str, name: &str) {
        if let Some(list) = self.state.borrow_mut().lists.get_mut(&ListId::from(id)) {
            list.0 = name.to_string();
        }
    }

    pub fn remove_member(&self, id: &str, member_id: &str) {
        if let Some(list) = self.state.borrow_mut().lists.get_mut(&ListId::from(id)) {
            list.1.retain(|c| c.member_id.as_str() != member_id);
        }
    }

    /// Make every membership fetch of `id` fail with `error`.
    pub fn break_list(&self, id: &str, error: PlatformError) {
        self.state.borrow_mut().broken.insert(ListId::from(id), error);
    }

    pub fn restore_list(&self, id: &str) {
        self.state.borrow_mut().broken.remove(&ListId::from(id));
    }

    pub fn fail_next(&self, op: Op, error: PlatformError, times: u32) {
        self.state.borrow_mut().calls.scripts.push(Script {
            op,
            error,
            remaining: times,
        });
    }

    pub fn count_calls(&self, op: Op) -> usize {
        self.state.borrow().calls.count(op)
    }

    fn hit(&self, op: Op) -> Result<(), PlatformError> {
        self.state.borrow_mut().calls.hit(op, self.pacer.as_ref())
    }
}

impl SourceLister for FakeSource {
    fn verify_access(&self) -> Result<(), PlatformError> {
        self.hit(Op::VerifyAccess)
    }

    fn get_list_name(&self, list: &ListId) -> Result<String, PlatformError> {
        self.hit(Op::GetListName)?;
        self.state
            .borrow()
            .lists
            .get(list)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| PlatformError::not_found(format!("list {list}")))
    }

    fn list_memberships(
        &self,
        list: &ListId,
        cursor: Option<&str>,
    ) -> Result<MembershipPage, PlatformError> {
        self.hit(Op::ListMemberships)?;
        let state = self.state.borrow();
        if let Some(error) = state.broken.get(list) {
            return Err(error.clone());
        }
        let (_, members) = state
            .lists
            .get(list)
            .ok_or_else(|| PlatformError::not_found(format!("list {list}")))?;
        let ids: Vec<MemberId> = members.iter().map(|c| c.member_id.clone()).collect();
        let (member_ids, next_cursor) = page(&ids, cursor, self.page_size);
        Ok(MembershipPage {
            member_ids,
            next_cursor,
        })
    }

    fn fetch_details(&self, members: &[MemberId]) -> Result<Vec<SourceContact>, PlatformError> {
        self.hit(Op::FetchDetails)?;
        let state = self.state.borrow();
        let mut found: BTreeMap<&MemberId, &SourceContact> = BTreeMap::new();
        for (_, contacts) in state.lists.values() {
            for c in contacts {
                if members.contains(&c.member_id) {
                    found.entry(&c.member_id).or_insert(c);
                }
            }
        }
        Ok(members
            .iter()
            .filter_map(|id| found.get(id).map(|c| (*c).clone()))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// FakeDestination
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct DestState {
    records: BTreeMap<Email, DestinationRecord>,
    tag_ids: BTreeMap<TagName, TagId>,
    next_id: u64,
    /// `Some` once field checking is on: writes to other keys fail.
    known_fields: Option<BTreeSet<String>>,
    rename_unsupported: bool,
    /// Errors returned after a create has already been stored.
    lost_creates: Vec<PlatformError>,
    calls: Calls,
}

impl DestState {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn register_tag(&mut self, tag: &TagName) {
        if !self.tag_ids.contains_key(tag) {
            let id = TagId(self.next("tag"));
            self.tag_ids.insert(tag.clone(), id);
        }
    }

    fn by_id(&mut self, id: &RecordId) -> Result<&mut DestinationRecord, PlatformError> {
        self.records
            .values_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| PlatformError::not_found(format!("record {id}")))
    }

    fn check_fields(&self, fields: &Fields) -> Result<(), PlatformError> {
        if let Some(known) = &self.known_fields {
            if let Some(missing) = fields.keys().find(|k| !known.contains(*k)) {
                return Err(PlatformError::missing_field(missing.clone()));
            }
        }
        Ok(())
    }
}

/// An audience-like destination.
#[derive(Debug)]
pub struct FakeDestination {
    state: RefCell<DestState>,
    origin_field: String,
    page_size: usize,
    pacer: Option<Pacer>,
}

impl Default for FakeDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDestination {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(DestState::default()),
            origin_field: "ORI_LISTS".to_string(),
            page_size: 2,
            pacer: None,
        }
    }

    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = Some(pacer);
        self
    }

    /// Insert a record directly, bypassing call logging.
    pub fn seed(&self, email: &str, status: ContactStatus, tags: &[&str]) -> RecordId {
        self.seed_with_fields(email, Some(status), tags, Fields::new())
    }

    pub fn seed_with_fields(
        &self,
        email: &str,
        status: Option<ContactStatus>,
        tags: &[&str],
        fields: Fields,
    ) -> RecordId {
        let mut state = self.state.borrow_mut();
        let email = Email::parse(email).unwrap_or_else(|e| panic!("seed email: {e}"));
        let tags: BTreeSet<TagName> = tags.iter().map(|t| TagName::from(*t)).collect();
        for tag in &tags {
            state.register_tag(tag);
        }
        let id = RecordId(state.next("rec"));
        state.records.insert(
            email.clone(),
            DestinationRecord {
                id: id.clone(),
                email,
                status,
                tags,
                fields,
            },
        );
        id
    }

    /// Define a tag with a fixed id before anything applies it.
    pub fn define_tag(&self, name: &str, id: &str) {
        self.state
            .borrow_mut()
            .tag_ids
            .insert(TagName::from(name), TagId::from(id));
    }

    /// Turn on field checking with `known` as the existing fields.
    pub fn strict_fields(&self, known: &[&str]) {
        self.state.borrow_mut().known_fields =
            Some(known.iter().map(|k| k.to_string()).collect());
    }

    /// Store the next `times` creates, then answer each with `error` as if
    /// the response had been lost.
    pub fn lose_create_responses(&self, error: PlatformError, times: usize) {
        self.state
            .borrow_mut()
            .lost_creates
            .extend(std::iter::repeat(error).take(times));
    }

    pub fn disable_rename(&self) {
        self.state.borrow_mut().rename_unsupported = true;
    }

    pub fn fail_next(&self, op: Op, error: PlatformError, times: u32) {
        self.state.borrow_mut().calls.scripts.push(Script {
            op,
            error,
            remaining: times,
        });
    }

    pub fn record(&self, email: &str) -> Option<DestinationRecord> {
        let email = Email::parse(email).ok()?;
        self.state.borrow().records.get(&email).cloned()
    }

    pub fn has_tag(&self, email: &str, tag: &str) -> bool {
        self.record(email)
            .is_some_and(|r| r.tags.contains(&TagName::from(tag)))
    }

    /// Tag names on the record, sorted.
    pub fn tags(&self, email: &str) -> Vec<String> {
        self.record(email)
            .map(|r| r.tags.iter().map(|t| t.to_string()).collect())
            .unwrap_or_default()
    }

    pub fn status(&self, email: &str) -> Option<ContactStatus> {
        self.record(email).and_then(|r| r.status)
    }

    pub fn field_value(&self, email: &str, key: &str) -> Option<String> {
        self.record(email).and_then(|r| r.fields.get(key).cloned())
    }

    pub fn tag_id(&self, tag: &str) -> Option<TagId> {
        self.state.borrow().tag_ids.get(&TagName::from(tag)).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.state.borrow().records.len()
    }

    pub fn count_calls(&self, op: Op) -> usize {
        self.state.borrow().calls.count(op)
    }

    pub fn total_calls(&self) -> usize {
        self.state.borrow().calls.log.len()
    }

    /// Count of mutating calls only.
    pub fn write_calls(&self) -> usize {
        [
            Op::Create,
            Op::Update,
            Op::ApplyTag,
            Op::RemoveTag,
            Op::Archive,
            Op::SetStatus,
            Op::RenameTag,
            Op::CreateField,
        ]
        .iter()
        .map(|op| self.count_calls(*op))
        .sum()
    }

    fn hit(&self, op: Op) -> Result<(), PlatformError> {
        self.state.borrow_mut().calls.hit(op, self.pacer.as_ref())
    }

    fn stream(&self, records: Vec<DestinationRecord>) -> RecordStream<'_> {
        Box::new(records.into_iter().map(Ok))
    }
}

impl DestinationMutator for FakeDestination {
    fn verify_access(&self) -> Result<(), PlatformError> {
        self.hit(Op::VerifyAccess)
    }

    fn find_by_email(&self, email: &Email) -> Result<Option<DestinationRecord>, PlatformError> {
        self.hit(Op::FindByEmail)?;
        Ok(self.state.borrow().records.get(email).cloned())
    }

    fn create(&self, record: &NewRecord) -> Result<RecordId, PlatformError> {
        self.hit(Op::Create)?;
        let mut state = self.state.borrow_mut();
        if state.records.contains_key(&record.email) {
            return Err(PlatformError::validation(format!(
                "{} is already a member",
                record.email
            )));
        }
        state.check_fields(&record.fields)?;
        let id = RecordId(state.next("rec"));
        state.records.insert(
            record.email.clone(),
            DestinationRecord {
                id: id.clone(),
                email: record.email.clone(),
                status: record.status,
                tags: BTreeSet::new(),
                fields: record.fields.clone(),
            },
        );
        if !state.lost_creates.is_empty() {
            return Err(state.lost_creates.remove(0));
        }
        Ok(id)
    }

    fn update(&self, id: &RecordId, fields: &Fields) -> Result<(), PlatformError> {
        self.hit(Op::Update)?;
        let mut state = self.state.borrow_mut();
        state.check_fields(fields)?;
        let record = state.by_id(id)?;
        record
            .fields
            .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn apply_tag(&self, id: &RecordId, tag: &TagName) -> Result<(), PlatformError> {
        self.hit(Op::ApplyTag)?;
        let mut state = self.state.borrow_mut();
        state.register_tag(tag);
        state.by_id(id)?.tags.insert(tag.clone());
        Ok(())
    }

    fn remove_tag(&self, id: &RecordId, tag: &TagName) -> Result<(), PlatformError> {
        self.hit(Op::RemoveTag)?;
        self.state.borrow_mut().by_id(id)?.tags.remove(tag);
        Ok(())
    }

    fn archive(&self, id: &RecordId) -> Result<(), PlatformError> {
        self.hit(Op::Archive)?;
        self.state.borrow_mut().by_id(id)?.status = Some(ContactStatus::Archived);
        Ok(())
    }

    fn set_subscription_status(
        &self,
        id: &RecordId,
        status: ContactStatus,
    ) -> Result<(), PlatformError> {
        self.hit(Op::SetStatus)?;
        self.state.borrow_mut().by_id(id)?.status = Some(status);
        Ok(())
    }

    fn list_all_records(&self) -> RecordStream<'_> {
        if let Err(e) = self.hit(Op::ListAll) {
            return Box::new(std::iter::once(Err(e)));
        }
        let records = self.state.borrow().records.values().cloned().collect();
        self.stream(records)
    }

    fn members_with_tag(&self, tag: &TagName) -> RecordStream<'_> {
        if let Err(e) = self.hit(Op::MembersWithTag) {
            return Box::new(std::iter::once(Err(e)));
        }
        let records = self
            .state
            .borrow()
            .records
            .values()
            .filter(|r| r.tags.contains(tag))
            .cloned()
            .collect();
        self.stream(records)
    }

    fn find_tag(&self, name: &TagName) -> Result<Option<TagRef>, PlatformError> {
        self.hit(Op::FindTag)?;
        Ok(self.state.borrow().tag_ids.get(name).map(|id| TagRef {
            id: id.clone(),
            name: name.clone(),
        }))
    }

    fn rename_tag_by_id(&self, id: &TagId, new_name: &TagName) -> Result<(), PlatformError> {
        self.hit(Op::RenameTag)?;
        let mut state = self.state.borrow_mut();
        if state.rename_unsupported {
            return Err(PlatformError::unsupported("rename_tag_by_id"));
        }
        let old = state
            .tag_ids
            .iter()
            .find(|(_, tid)| *tid == id)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| PlatformError::not_found(format!("tag {id}")))?;
        state.tag_ids.remove(&old);
        state.tag_ids.insert(new_name.clone(), id.clone());
        for record in state.records.values_mut() {
            if record.tags.remove(&old) {
                record.tags.insert(new_name.clone());
            }
        }
        Ok(())
    }

    fn list_fields(&self) -> Result<Vec<String>, PlatformError> {
        self.hit(Op::ListFields)?;
        match &self.state.borrow().known_fields {
            Some(known) => Ok(known.iter().cloned().collect()),
            None => Err(PlatformError::unsupported("list_fields")),
        }
    }

    fn create_field(&self, key: &str) -> Result<(), PlatformError> {
        self.hit(Op::CreateField)?;
        if let Some(known) = self.state.borrow_mut().known_fields.as_mut() {
            known.insert(key.to_string());
        }
        Ok(())
    }
}

/// The destination as a source of exit-tagged contacts: each "list" is a tag.
impl SourceLister for FakeDestination {
    fn verify_access(&self) -> Result<(), PlatformError> {
        self.hit(Op::VerifyAccess)
    }

    fn get_list_name(&self, list: &ListId) -> Result<String, PlatformError> {
        self.hit(Op::GetListName)?;
        Ok(list.to_string())
    }

    fn list_memberships(
        &self,
        list: &ListId,
        cursor: Option<&str>,
    ) -> Result<MembershipPage, PlatformError> {
        self.hit(Op::ListMemberships)?;
        let tag = TagName::from(list.as_str());
        let ids: Vec<MemberId> = self
            .state
            .borrow()
            .records
            .values()
            .filter(|r| r.tags.contains(&tag) && r.status != Some(ContactStatus::Archived))
            .map(|r| MemberId::from(r.id.as_str()))
            .collect();
        let (member_ids, next_cursor) = page(&ids, cursor, self.page_size);
        Ok(MembershipPage {
            member_ids,
            next_cursor,
        })
    }

    fn fetch_details(&self, members: &[MemberId]) -> Result<Vec<SourceContact>, PlatformError> {
        self.hit(Op::FetchDetails)?;
        let state = self.state.borrow();
        Ok(state
            .records
            .values()
            .filter(|r| members.iter().any(|m| m.as_str() == r.id.as_str()))
            .map(|r| SourceContact {
                member_id: MemberId::from(r.id.as_str()),
                email: Some(r.email.to_string()),
                properties: r.fields.clone(),
                origin_lists: r
                    .fields
                    .get(&self.origin_field)
                    .map(|raw| parse_origin(raw))
                    .unwrap_or_default(),
                tags: r.tags.clone(),
                status: r.status,
            })
            .collect())
    }
}
