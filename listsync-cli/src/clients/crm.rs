//! CRM client: v3 lists, memberships, batch contact reads and contact writes.
//!
//! As a [`SourceLister`] it feeds the forward half-cycle. As a
//! [`DestinationMutator`] it receives the reverse half-cycle, where list ids
//! play the role of tags: applying tag `900` adds the contact to list 900.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::json;

use listsync_core::{
    ContactStatus, DestinationRecord, Email, Fields, ListId, MemberId, NewRecord, RecordId, SourceContact,
    TagName,
};
use listsync_engine::{
    DestinationMutator, MembershipPage, Pacer, PlatformError, RecordStream, SourceLister,
};

use super::{ignore_not_found, Http};

pub const CRM_BASE_URL: &str = "https://api.hubapi.com";

/// Object type id of contacts in list membership endpoints.
const CONTACT_OBJECT: &str = "0-1";

pub struct CrmClient {
    http: Http,
    page_size: usize,
    /// Properties requested on every contact read.
    properties: Vec<String>,
}

impl CrmClient {
    pub fn new(token: &str, pacer: Pacer, page_size: usize, properties: Vec<String>) -> Self {
        Self::with_base_url(CRM_BASE_URL, token, pacer, page_size, properties)
    }

    pub fn with_base_url(
        base_url: &str,
        token: &str,
        pacer: Pacer,
        page_size: usize,
        properties: Vec<String>,
    ) -> Self {
        Self {
            http: Http::new(base_url, format!("Bearer {token}"), pacer),
            page_size,
            properties,
        }
    }

    fn list_ids_of(&self, id: &RecordId) -> Result<BTreeSet<TagName>, PlatformError> {
        let path = format!("/crm/v3/lists/records/{CONTACT_OBJECT}/{id}/memberships");
        let body: RecordMemberships = self.http.get(&path, &[])?;
        Ok(body
            .results
            .into_iter()
            .map(|m| TagName::from(m.list_id.as_str()))
            .collect())
    }

    fn membership_change(&self, list: &TagName, id: &RecordId, action: &str) -> Result<(), PlatformError> {
        let path = format!("/crm/v3/lists/{list}/memberships/{action}");
        self.http.send_unit("PUT", &path, Some(json!([id.as_str()])))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ListEnvelope {
    list: ListBody,
}

#[derive(Deserialize)]
struct ListBody {
    name: String,
}

#[derive(Deserialize)]
struct MembershipsBody {
    #[serde(default)]
    results: Vec<Membership>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Membership {
    record_id: String,
}

#[derive(Deserialize)]
struct Paging {
    next: Option<NextPage>,
}

#[derive(Deserialize)]
struct NextPage {
    after: String,
}

#[derive(Deserialize)]
struct ContactsBody {
    #[serde(default)]
    results: Vec<ContactBody>,
}

#[derive(Deserialize)]
struct ContactBody {
    id: String,
    #[serde(default)]
    properties: BTreeMap<String, Option<String>>,
}

impl ContactBody {
    /// Non-empty properties, with `email` split out.
    fn into_parts(self) -> (String, Option<String>, BTreeMap<String, String>) {
        let mut props: BTreeMap<String, String> = self
            .properties
            .into_iter()
            .filter_map(|(k, v)| v.filter(|v| !v.trim().is_empty()).map(|v| (k, v)))
            .collect();
        let email = props.remove("email");
        (self.id, email, props)
    }
}

#[derive(Deserialize)]
struct CreatedBody {
    id: String,
}

#[derive(Deserialize)]
struct RecordMemberships {
    #[serde(default)]
    results: Vec<RecordMembership>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordMembership {
    list_id: String,
}

#[derive(Deserialize)]
struct PropertiesBody {
    #[serde(default)]
    results: Vec<PropertyBody>,
}

#[derive(Deserialize)]
struct PropertyBody {
    name: String,
}

// ---------------------------------------------------------------------------
// SourceLister
// ---------------------------------------------------------------------------

impl SourceLister for CrmClient {
    fn verify_access(&self) -> Result<(), PlatformError> {
        self.http
            .get::<serde_json::Value>("/crm/v3/objects/contacts", &[("limit", "1")])
            .map(drop)
    }

    fn get_list_name(&self, list: &ListId) -> Result<String, PlatformError> {
        let body: ListEnvelope = self.http.get(&format!("/crm/v3/lists/{list}"), &[])?;
        Ok(body.list.name)
    }

    fn list_memberships(
        &self,
        list: &ListId,
        cursor: Option<&str>,
    ) -> Result<MembershipPage, PlatformError> {
        let limit = self.page_size.to_string();
        let mut query = vec![("limit", limit.as_str())];
        if let Some(after) = cursor {
            query.push(("after", after));
        }
        let body: MembershipsBody = self
            .http
            .get(&format!("/crm/v3/lists/{list}/memberships"), &query)?;
        Ok(MembershipPage {
            member_ids: body
                .results
                .into_iter()
                .map(|m| MemberId::from(m.record_id.as_str()))
                .collect(),
            next_cursor: body.paging.and_then(|p| p.next).map(|n| n.after),
        })
    }

    fn fetch_details(&self, members: &[MemberId]) -> Result<Vec<SourceContact>, PlatformError> {
        if members.is_empty() {
            return Ok(Vec::new());
        }
        let inputs: Vec<_> = members.iter().map(|m| json!({ "id": m.as_str() })).collect();
        let body: ContactsBody = self.http.send(
            "POST",
            "/crm/v3/objects/contacts/batch/read",
            json!({ "properties": self.properties, "inputs": inputs }),
        )?;
        Ok(body
            .results
            .into_iter()
            .map(|c| {
                let (id, email, properties) = c.into_parts();
                SourceContact {
                    member_id: MemberId::from(id.as_str()),
                    email,
                    properties,
                    ..SourceContact::default()
                }
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// DestinationMutator
// ---------------------------------------------------------------------------

impl DestinationMutator for CrmClient {
    fn verify_access(&self) -> Result<(), PlatformError> {
        SourceLister::verify_access(self)
    }

    fn find_by_email(&self, email: &Email) -> Result<Option<DestinationRecord>, PlatformError> {
        let body: ContactsBody = self.http.send(
            "POST",
            "/crm/v3/objects/contacts/search",
            json!({
                "filterGroups": [{
                    "filters": [{ "propertyName": "email", "operator": "EQ", "value": email.as_str() }]
                }],
                "properties": self.properties,
                "limit": 1,
            }),
        )?;
        let Some(contact) = body.results.into_iter().next() else {
            return Ok(None);
        };
        let (id, _, fields) = contact.into_parts();
        let id = RecordId::from(id.as_str());
        let tags = self.list_ids_of(&id)?;
        Ok(Some(DestinationRecord {
            id,
            email: email.clone(),
            status: None,
            tags,
            fields,
        }))
    }

    fn create(&self, record: &NewRecord) -> Result<RecordId, PlatformError> {
        let mut properties = record.fields.clone();
        properties.insert("email".into(), record.email.to_string());
        let body: CreatedBody = self.http.send(
            "POST",
            "/crm/v3/objects/contacts",
            json!({ "properties": properties }),
        )?;
        Ok(RecordId::from(body.id.as_str()))
    }

    fn update(&self, id: &RecordId, fields: &Fields) -> Result<(), PlatformError> {
        self.http.send_unit(
            "PATCH",
            &format!("/crm/v3/objects/contacts/{id}"),
            Some(json!({ "properties": fields })),
        )
    }

    fn apply_tag(&self, id: &RecordId, tag: &TagName) -> Result<(), PlatformError> {
        self.membership_change(tag, id, "add")
    }

    fn remove_tag(&self, id: &RecordId, tag: &TagName) -> Result<(), PlatformError> {
        self.membership_change(tag, id, "remove")
    }

    fn archive(&self, id: &RecordId) -> Result<(), PlatformError> {
        ignore_not_found(self.http.send_unit(
            "DELETE",
            &format!("/crm/v3/objects/contacts/{id}"),
            None,
        ))
    }

    fn set_subscription_status(
        &self,
        _id: &RecordId,
        _status: ContactStatus,
    ) -> Result<(), PlatformError> {
        Err(PlatformError::unsupported("set_subscription_status"))
    }

    /// The reverse half-cycle never enumerates the CRM.
    fn list_all_records(&self) -> RecordStream<'_> {
        Box::new(std::iter::once(Err(PlatformError::unsupported(
            "list_all_records",
        ))))
    }

    fn list_fields(&self) -> Result<Vec<String>, PlatformError> {
        let body: PropertiesBody = self.http.get("/crm/v3/properties/contacts", &[])?;
        Ok(body.results.into_iter().map(|p| p.name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_parts_drop_empty_properties() {
        let body: ContactBody = serde_json::from_str(
            r#"{"id":"51","properties":{"email":"a@x.com","firstname":"Ann","lastname":null,"city":" "}}"#,
        )
        .unwrap();
        let (id, email, props) = body.into_parts();
        assert_eq!(id, "51");
        assert_eq!(email.as_deref(), Some("a@x.com"));
        assert_eq!(props.len(), 1);
        assert_eq!(props["firstname"], "Ann");
    }

    #[test]
    fn membership_paging_cursor() {
        let body: MembershipsBody = serde_json::from_str(
            r#"{"results":[{"recordId":"1"},{"recordId":"2"}],"paging":{"next":{"after":"abc"}}}"#,
        )
        .unwrap();
        assert_eq!(body.results.len(), 2);
        assert_eq!(body.paging.and_then(|p| p.next).map(|n| n.after).as_deref(), Some("abc"));

        let last: MembershipsBody = serde_json::from_str(r#"{"results":[]}"#).unwrap();
        assert!(last.paging.is_none());
    }
}
