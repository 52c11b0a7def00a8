//! Platform capabilities the engine is written against.
//!
//! The forward half-cycle fills [`SourceLister`] with the CRM and
//! [`DestinationMutator`] with the audience; the reverse half-cycle swaps them.
//! On the CRM side, list ids play the role of tags.
//!
//! All methods take `&self`: clients are blocking and single-threaded, and any
//! bookkeeping they need lives behind interior mutability.

use listsync_core::{
    ContactStatus, DestinationRecord, Email, Fields, ListId, MemberId, NewRecord, RecordId,
    SourceContact, TagId, TagName, TagRef,
};

use crate::error::PlatformError;

/// Lazily-paged sequence of destination records.
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<DestinationRecord, PlatformError>> + 'a>;

/// One page of list membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipPage {
    pub member_ids: Vec<MemberId>,
    /// `None` on the last page.
    pub next_cursor: Option<String>,
}

/// Read side: list names, paginated membership, batch detail fetch.
pub trait SourceLister {
    /// Cheap authenticated call made before any mutation.
    fn verify_access(&self) -> Result<(), PlatformError> {
        Ok(())
    }

    fn get_list_name(&self, list: &ListId) -> Result<String, PlatformError>;

    fn list_memberships(
        &self,
        list: &ListId,
        cursor: Option<&str>,
    ) -> Result<MembershipPage, PlatformError>;

    /// Details for a batch of members. Members the platform no longer knows are
    /// omitted from the result.
    fn fetch_details(&self, members: &[MemberId]) -> Result<Vec<SourceContact>, PlatformError>;
}

/// Write side: idempotent record, tag and status primitives.
///
/// Removing an absent tag, archiving an archived record and tagging a tagged
/// record must all succeed.
pub trait DestinationMutator {
    fn verify_access(&self) -> Result<(), PlatformError> {
        Ok(())
    }

    fn find_by_email(&self, email: &Email) -> Result<Option<DestinationRecord>, PlatformError>;

    fn create(&self, record: &NewRecord) -> Result<RecordId, PlatformError>;

    fn update(&self, id: &RecordId, fields: &Fields) -> Result<(), PlatformError>;

    fn apply_tag(&self, id: &RecordId, tag: &TagName) -> Result<(), PlatformError>;

    /// Deactivate `tag` on the record. Never deletes the tag itself.
    fn remove_tag(&self, id: &RecordId, tag: &TagName) -> Result<(), PlatformError>;

    fn archive(&self, id: &RecordId) -> Result<(), PlatformError>;

    fn set_subscription_status(
        &self,
        id: &RecordId,
        status: ContactStatus,
    ) -> Result<(), PlatformError>;

    /// Every record on the platform, paged lazily.
    fn list_all_records(&self) -> RecordStream<'_>;

    /// Every email on the platform, paged lazily.
    fn list_all_emails(&self) -> Box<dyn Iterator<Item = Result<Email, PlatformError>> + '_> {
        Box::new(self.list_all_records().map(|r| r.map(|rec| rec.email)))
    }

    /// Records currently carrying `tag`.
    fn members_with_tag(&self, tag: &TagName) -> RecordStream<'_> {
        let tag = tag.clone();
        Box::new(
            self.list_all_records()
                .filter(move |r| r.as_ref().map_or(true, |rec| rec.tags.contains(&tag))),
        )
    }

    /// Resolve a tag name to its durable identifier.
    fn find_tag(&self, _name: &TagName) -> Result<Option<TagRef>, PlatformError> {
        Err(PlatformError::unsupported("find_tag"))
    }

    /// Rename the tag in place; id and membership are preserved.
    fn rename_tag_by_id(&self, _id: &TagId, _new_name: &TagName) -> Result<(), PlatformError> {
        Err(PlatformError::unsupported("rename_tag_by_id"))
    }

    /// Keys of the fields records may carry.
    fn list_fields(&self) -> Result<Vec<String>, PlatformError> {
        Err(PlatformError::unsupported("list_fields"))
    }

    fn create_field(&self, _key: &str) -> Result<(), PlatformError> {
        Err(PlatformError::unsupported("create_field"))
    }
}
