//! Domain types for listsync.
//!
//! Identifiers are newtypes over `String`; they are never interchangeable.
//! All types are serializable via serde so they can appear in config files and
//! run reports.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::EmailError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Identifier of a list on the source (CRM) platform.
    ListId
);
string_newtype!(
    /// Display name of a destination tag. Mutable metadata, not identity.
    TagName
);
string_newtype!(
    /// Durable identifier of the static group backing a tag.
    TagId
);
string_newtype!(
    /// Identifier of a contact record on a destination platform.
    RecordId
);
string_newtype!(
    /// Identifier of a list member as reported by a source platform.
    MemberId
);

/// YAML users write list ids both quoted and bare (`- 718`), so accept either.
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Num(u64),
}

impl From<StringOrNumber> for String {
    fn from(v: StringOrNumber) -> Self {
        match v {
            StringOrNumber::Str(s) => s,
            StringOrNumber::Num(n) => n.to_string(),
        }
    }
}

macro_rules! lenient_deserialize {
    ($($name:ident),*) => {
        $(
            impl<'de> Deserialize<'de> for $name {
                fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                    StringOrNumber::deserialize(deserializer).map(|v| Self(v.into()))
                }
            }
        )*
    };
}

lenient_deserialize!(ListId, TagName, TagId, RecordId, MemberId);

// ---------------------------------------------------------------------------
// Email
// ---------------------------------------------------------------------------

/// A normalized (trimmed, lower-cased) email address. The identity of a contact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "String")]
pub struct Email(String);

impl Email {
    /// Normalize and validate a raw address.
    pub fn parse(raw: &str) -> Result<Self, EmailError> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(EmailError::Empty);
        }
        if normalized.chars().any(char::is_whitespace) {
            return Err(EmailError::Whitespace(normalized));
        }
        let mut parts = normalized.split('@');
        let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(EmailError::AtSign(normalized));
        };
        if local.is_empty() {
            return Err(EmailError::EmptyLocal(normalized));
        }
        let domain_ok = domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.')
            && !domain.contains("..");
        if !domain_ok {
            return Err(EmailError::Domain(normalized));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Email> for String {
    fn from(e: Email) -> Self {
        e.0
    }
}

impl<'de> Deserialize<'de> for Email {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Email::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Subscription status of a contact on the audience platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Subscribed,
    Unsubscribed,
    Cleaned,
    Pending,
    Archived,
}

impl ContactStatus {
    /// Parse the lowercase wire spelling. Unknown spellings yield `None`.
    pub fn from_api(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "subscribed" => Some(Self::Subscribed),
            "unsubscribed" => Some(Self::Unsubscribed),
            "cleaned" => Some(Self::Cleaned),
            // transactional members behave like pending ones for our purposes
            "pending" | "transactional" => Some(Self::Pending),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::Subscribed => "subscribed",
            ContactStatus::Unsubscribed => "unsubscribed",
            ContactStatus::Cleaned => "cleaned",
            ContactStatus::Pending => "pending",
            ContactStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Destination field key → value.
pub type Fields = BTreeMap<String, String>;

/// A list member as reported by a [source platform](crate).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceContact {
    pub member_id: MemberId,
    /// Raw, unvalidated address. `None` when the source has no email property.
    pub email: Option<String>,
    /// Source property name → value (e.g. `firstname`, or a merge tag when the
    /// audience platform is the source).
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Source lists recorded against this contact on the platform it came from.
    #[serde(default)]
    pub origin_lists: BTreeSet<ListId>,
    #[serde(default)]
    pub tags: BTreeSet<TagName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ContactStatus>,
}

impl Default for MemberId {
    fn default() -> Self {
        Self(String::new())
    }
}

/// A contact record as it currently exists on a destination platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationRecord {
    pub id: RecordId,
    pub email: Email,
    /// `None` for platforms without a subscription concept (the CRM).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ContactStatus>,
    /// Active tags (or, on the CRM, known list memberships).
    #[serde(default)]
    pub tags: BTreeSet<TagName>,
    #[serde(default)]
    pub fields: Fields,
}

impl DestinationRecord {
    /// Origin lists stored in `origin_field`, empty when unset.
    pub fn origin_lists(&self, origin_field: &str) -> BTreeSet<ListId> {
        self.fields
            .get(origin_field)
            .map(|raw| parse_origin(raw))
            .unwrap_or_default()
    }
}

/// Payload for creating a destination record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub email: Email,
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ContactStatus>,
}

/// A destination tag resolved to its durable identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRef {
    pub id: TagId,
    pub name: TagName,
}

/// Serialize an origin-list set as the sorted, comma-joined field value.
pub fn format_origin<'a>(lists: impl IntoIterator<Item = &'a ListId>) -> String {
    let sorted: BTreeSet<&str> = lists.into_iter().map(ListId::as_str).collect();
    sorted.into_iter().collect::<Vec<_>>().join(",")
}

/// Parse an origin-list field value. Blank segments are ignored.
pub fn parse_origin(raw: &str) -> BTreeSet<ListId> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ListId::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
