//! Audience client: one audience (list) of a 3.0-style email marketing API.
//!
//! Members are addressed by the MD5 hash of their lowercased email. Tags are
//! static segments: they are searched by name, renamed through the segments
//! endpoint, and switched off per member with an `inactive` status.
//!
//! As a [`SourceLister`] (reverse half-cycle) a "list id" is a tag name.

use std::cell::RefCell;
use std::collections::BTreeMap;

use md5::{Digest, Md5};
use serde::Deserialize;
use serde_json::{json, Value};

use listsync_core::{
    parse_origin, ContactStatus, DestinationRecord, Email, Fields, ListId, MemberId, NewRecord,
    RecordId, SourceContact, TagId, TagName, TagRef,
};
use listsync_engine::{
    DestinationMutator, MembershipPage, Pacer, PlatformError, PlatformErrorKind, RecordStream,
    SourceLister,
};

use super::{ignore_not_found, Credentials, Http};

/// Merge fields created on demand are plain text.
const FIELD_TYPE: &str = "text";

pub struct AudienceClient {
    http: Http,
    list_id: String,
    page_size: usize,
    origin_field: String,
    /// Tag name → segment id, `None` when the tag does not exist.
    tag_ids: RefCell<BTreeMap<TagName, Option<TagId>>>,
}

/// `md5(lowercase(email))`, the member id on the audience platform.
pub fn subscriber_hash(email: &str) -> String {
    hex::encode(Md5::digest(email.trim().to_lowercase().as_bytes()))
}

impl AudienceClient {
    pub fn new(creds: &Credentials, pacer: Pacer, page_size: usize, origin_field: &str) -> Self {
        let base_url = format!("https://{}.api.mailchimp.com/3.0", creds.audience_dc);
        Self::with_base_url(
            &base_url,
            &creds.audience_api_key,
            &creds.audience_list_id,
            pacer,
            page_size,
            origin_field,
        )
    }

    pub fn with_base_url(
        base_url: &str,
        api_key: &str,
        list_id: &str,
        pacer: Pacer,
        page_size: usize,
        origin_field: &str,
    ) -> Self {
        Self {
            http: Http::new(base_url, format!("apikey {api_key}"), pacer),
            list_id: list_id.to_owned(),
            page_size: page_size.max(1),
            origin_field: origin_field.to_owned(),
            tag_ids: RefCell::new(BTreeMap::new()),
        }
    }

    fn path(&self, rest: &str) -> String {
        format!("/lists/{}{rest}", self.list_id)
    }

    fn member_path(&self, id: &str) -> String {
        self.path(&format!("/members/{id}"))
    }

    fn get_member(&self, id: &str) -> Result<Option<MemberBody>, PlatformError> {
        match self.http.get::<MemberBody>(&self.member_path(id), &[]) {
            Ok(member) => Ok(Some(member)),
            Err(e) if e.kind == PlatformErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set_tag(&self, id: &RecordId, tag: &TagName, status: &str) -> Result<(), PlatformError> {
        self.http.send_unit(
            "POST",
            &self.member_path(&format!("{id}/tags")),
            Some(json!({ "tags": [{ "name": tag.as_str(), "status": status }] })),
        )
    }

    fn tag_id(&self, name: &TagName) -> Result<Option<TagId>, PlatformError> {
        if let Some(cached) = self.tag_ids.borrow().get(name) {
            return Ok(cached.clone());
        }
        let found = self.find_tag(name)?.map(|t| t.id);
        self.tag_ids.borrow_mut().insert(name.clone(), found.clone());
        Ok(found)
    }

    fn members_page(&self, path: &str, offset: usize) -> Result<MembersBody, PlatformError> {
        let count = self.page_size.to_string();
        let offset = offset.to_string();
        self.http
            .get(path, &[("count", count.as_str()), ("offset", offset.as_str())])
    }

    fn pages(&self, path: String) -> RecordStream<'_> {
        Box::new(MemberPages {
            client: self,
            path,
            offset: 0,
            total: None,
            buffer: Vec::new().into_iter(),
            done: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct MemberBody {
    id: String,
    email_address: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    merge_fields: BTreeMap<String, Value>,
    #[serde(default)]
    tags: Vec<TagBody>,
}

#[derive(Deserialize)]
struct TagBody {
    id: Value,
    name: String,
}

#[derive(Deserialize)]
struct MembersBody {
    #[serde(default)]
    members: Vec<MemberBody>,
    #[serde(default)]
    total_items: usize,
}

#[derive(Deserialize)]
struct TagSearchBody {
    #[serde(default)]
    tags: Vec<TagBody>,
}

#[derive(Deserialize)]
struct MergeFieldsBody {
    #[serde(default)]
    merge_fields: Vec<MergeFieldBody>,
}

#[derive(Deserialize)]
struct MergeFieldBody {
    tag: String,
}

/// Ids arrive as numbers from some endpoints and strings from others.
fn id_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl MemberBody {
    /// Scalar merge fields as strings; empty and structured values are dropped.
    fn fields(&self) -> Fields {
        self.merge_fields
            .iter()
            .filter_map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                (!value.trim().is_empty()).then(|| (k.clone(), value))
            })
            .collect()
    }

    fn tag_names(&self) -> impl Iterator<Item = TagName> + '_ {
        self.tags.iter().map(|t| TagName::from(t.name.as_str()))
    }

    fn into_record(self) -> Option<DestinationRecord> {
        let email = match Email::parse(&self.email_address) {
            Ok(email) => email,
            Err(e) => {
                tracing::warn!("skipping audience member {}: {e}", self.id);
                return None;
            }
        };
        Some(DestinationRecord {
            id: RecordId::from(self.id.as_str()),
            email,
            status: ContactStatus::from_api(&self.status),
            tags: self.tag_names().collect(),
            fields: self.fields(),
        })
    }
}

/// Lazily walks an offset-paged member collection.
struct MemberPages<'a> {
    client: &'a AudienceClient,
    path: String,
    offset: usize,
    total: Option<usize>,
    buffer: std::vec::IntoIter<MemberBody>,
    done: bool,
}

impl Iterator for MemberPages<'_> {
    type Item = Result<DestinationRecord, PlatformError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            for member in self.buffer.by_ref() {
                if let Some(record) = member.into_record() {
                    return Some(Ok(record));
                }
            }
            if self.done || self.total.is_some_and(|total| self.offset >= total) {
                return None;
            }
            match self.client.members_page(&self.path, self.offset) {
                Ok(page) => {
                    if page.members.is_empty() {
                        self.done = true;
                        return None;
                    }
                    self.offset += page.members.len();
                    self.total = Some(page.total_items);
                    self.buffer = page.members.into_iter();
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DestinationMutator
// ---------------------------------------------------------------------------

impl DestinationMutator for AudienceClient {
    fn verify_access(&self) -> Result<(), PlatformError> {
        self.http
            .get::<Value>(&self.path(""), &[("fields", "id,name")])
            .map(drop)
    }

    fn find_by_email(&self, email: &Email) -> Result<Option<DestinationRecord>, PlatformError> {
        Ok(self
            .get_member(&subscriber_hash(email.as_str()))?
            .and_then(MemberBody::into_record))
    }

    fn create(&self, record: &NewRecord) -> Result<RecordId, PlatformError> {
        let status = record.status.unwrap_or(ContactStatus::Subscribed);
        let body: MemberBody = self.http.send(
            "POST",
            &self.path("/members"),
            json!({
                "email_address": record.email.as_str(),
                "status": status.as_str(),
                "merge_fields": record.fields,
            }),
        )?;
        Ok(RecordId::from(body.id.as_str()))
    }

    fn update(&self, id: &RecordId, fields: &Fields) -> Result<(), PlatformError> {
        self.http.send_unit(
            "PATCH",
            &self.member_path(id.as_str()),
            Some(json!({ "merge_fields": fields })),
        )
    }

    fn apply_tag(&self, id: &RecordId, tag: &TagName) -> Result<(), PlatformError> {
        self.set_tag(id, tag, "active")?;
        // a fresh tag now exists; forget a cached miss
        let cached_miss = matches!(self.tag_ids.borrow().get(tag), Some(None));
        if cached_miss {
            self.tag_ids.borrow_mut().remove(tag);
        }
        Ok(())
    }

    fn remove_tag(&self, id: &RecordId, tag: &TagName) -> Result<(), PlatformError> {
        self.set_tag(id, tag, "inactive")
    }

    fn archive(&self, id: &RecordId) -> Result<(), PlatformError> {
        ignore_not_found(self.http.send_unit("DELETE", &self.member_path(id.as_str()), None))
    }

    fn set_subscription_status(
        &self,
        id: &RecordId,
        status: ContactStatus,
    ) -> Result<(), PlatformError> {
        if status == ContactStatus::Archived {
            return self.archive(id);
        }
        self.http.send_unit(
            "PATCH",
            &self.member_path(id.as_str()),
            Some(json!({ "status": status.as_str() })),
        )
    }

    fn list_all_records(&self) -> RecordStream<'_> {
        self.pages(self.path("/members"))
    }

    fn members_with_tag(&self, tag: &TagName) -> RecordStream<'_> {
        match self.tag_id(tag) {
            Ok(Some(id)) => self.pages(self.path(&format!("/segments/{id}/members"))),
            Ok(None) => Box::new(std::iter::empty()),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    fn find_tag(&self, name: &TagName) -> Result<Option<TagRef>, PlatformError> {
        let body: TagSearchBody = self
            .http
            .get(&self.path("/tag-search"), &[("name", name.as_str())])?;
        Ok(body
            .tags
            .into_iter()
            .find(|t| t.name == name.as_str())
            .map(|t| TagRef {
                id: TagId::from(id_string(&t.id).as_str()),
                name: TagName::from(t.name.as_str()),
            }))
    }

    fn rename_tag_by_id(&self, id: &TagId, new_name: &TagName) -> Result<(), PlatformError> {
        self.http.send_unit(
            "PATCH",
            &self.path(&format!("/segments/{id}")),
            Some(json!({ "name": new_name.as_str() })),
        )?;
        self.tag_ids.borrow_mut().clear();
        Ok(())
    }

    fn list_fields(&self) -> Result<Vec<String>, PlatformError> {
        let body: MergeFieldsBody = self
            .http
            .get(&self.path("/merge-fields"), &[("count", "1000")])?;
        Ok(body.merge_fields.into_iter().map(|f| f.tag).collect())
    }

    fn create_field(&self, key: &str) -> Result<(), PlatformError> {
        tracing::info!("creating merge field {key}");
        self.http.send_unit(
            "POST",
            &self.path("/merge-fields"),
            Some(json!({ "tag": key, "name": key, "type": FIELD_TYPE, "required": false })),
        )
    }
}

// ---------------------------------------------------------------------------
// SourceLister (exit tags)
// ---------------------------------------------------------------------------

impl SourceLister for AudienceClient {
    fn verify_access(&self) -> Result<(), PlatformError> {
        DestinationMutator::verify_access(self)
    }

    fn get_list_name(&self, list: &ListId) -> Result<String, PlatformError> {
        Ok(list.to_string())
    }

    /// The cursor is the numeric offset of the next page.
    fn list_memberships(
        &self,
        list: &ListId,
        cursor: Option<&str>,
    ) -> Result<MembershipPage, PlatformError> {
        let Some(id) = self.tag_id(&TagName::from(list.as_str()))? else {
            return Ok(MembershipPage::default());
        };
        let offset = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| PlatformError::validation(format!("bad page cursor '{c}'")))?,
            None => 0,
        };
        let page = self.members_page(&self.path(&format!("/segments/{id}/members")), offset)?;
        let next = offset + page.members.len();
        Ok(MembershipPage {
            next_cursor: (!page.members.is_empty() && next < page.total_items)
                .then(|| next.to_string()),
            member_ids: page
                .members
                .into_iter()
                .map(|m| MemberId::from(m.id.as_str()))
                .collect(),
        })
    }

    fn fetch_details(&self, members: &[MemberId]) -> Result<Vec<SourceContact>, PlatformError> {
        let mut contacts = Vec::with_capacity(members.len());
        for member in members {
            let Some(body) = self.get_member(member.as_str())? else {
                continue;
            };
            let fields = body.fields();
            contacts.push(SourceContact {
                member_id: MemberId::from(body.id.as_str()),
                email: Some(body.email_address.clone()),
                origin_lists: fields
                    .get(&self.origin_field)
                    .map(|raw| parse_origin(raw))
                    .unwrap_or_default(),
                tags: body.tag_names().collect(),
                status: ContactStatus::from_api(&body.status),
                properties: fields,
            });
        }
        Ok(contacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_hash_is_md5_of_lowercase() {
        assert_eq!(subscriber_hash("Urist.McVankab@freddiesjokes.com"), "62eeb292278cc15f5817cb78f7790b08");
        assert_eq!(subscriber_hash(" a@X.com "), subscriber_hash("a@x.com"));
    }

    #[test]
    fn member_body_to_record() {
        let body: MemberBody = serde_json::from_str(
            r#"{
                "id": "abc",
                "email_address": "Ann@X.com",
                "status": "subscribed",
                "merge_fields": {"FNAME": "Ann", "LNAME": "", "ORI_LISTS": "718,719", "ZIP": 12345, "ADDRESS": {"addr1": "x"}},
                "tags": [{"id": 31, "name": "General"}]
            }"#,
        )
        .unwrap();
        let record = body.into_record().unwrap();
        assert_eq!(record.email.as_str(), "ann@x.com");
        assert_eq!(record.status, Some(ContactStatus::Subscribed));
        assert!(record.tags.contains(&TagName::from("General")));
        assert_eq!(record.fields.len(), 3);
        assert_eq!(record.fields["ZIP"], "12345");
    }

    #[test]
    fn tag_ids_may_be_numbers_or_strings() {
        assert_eq!(id_string(&json!(31)), "31");
        assert_eq!(id_string(&json!("31")), "31");
    }
}
