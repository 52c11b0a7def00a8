//! The mutation model: what the planner emits and the executor applies.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{ContactStatus, Email, Fields, TagId, TagName};

/// One idempotent change to a destination platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    Create {
        contact: Email,
        fields: Fields,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<ContactStatus>,
    },
    Update {
        contact: Email,
        fields: Fields,
    },
    ApplyTag {
        contact: Email,
        tag: TagName,
    },
    /// Deactivates the tag; membership history is kept on the platform.
    RemoveTag {
        contact: Email,
        tag: TagName,
    },
    RenameTag {
        tag_id: TagId,
        from: TagName,
        to: TagName,
    },
    Archive {
        contact: Email,
    },
    SetStatus {
        contact: Email,
        status: ContactStatus,
    },
}

/// Discriminant of [`Mutation`], used for report totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    ApplyTag,
    RemoveTag,
    RenameTag,
    Archive,
    SetStatus,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::ApplyTag => "apply_tag",
            MutationKind::RemoveTag => "remove_tag",
            MutationKind::RenameTag => "rename_tag",
            MutationKind::Archive => "archive",
            MutationKind::SetStatus => "set_status",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Create { .. } => MutationKind::Create,
            Mutation::Update { .. } => MutationKind::Update,
            Mutation::ApplyTag { .. } => MutationKind::ApplyTag,
            Mutation::RemoveTag { .. } => MutationKind::RemoveTag,
            Mutation::RenameTag { .. } => MutationKind::RenameTag,
            Mutation::Archive { .. } => MutationKind::Archive,
            Mutation::SetStatus { .. } => MutationKind::SetStatus,
        }
    }

    /// The contact this mutation targets. `None` for tag-level mutations.
    pub fn contact(&self) -> Option<&Email> {
        match self {
            Mutation::Create { contact, .. }
            | Mutation::Update { contact, .. }
            | Mutation::ApplyTag { contact, .. }
            | Mutation::RemoveTag { contact, .. }
            | Mutation::Archive { contact }
            | Mutation::SetStatus { contact, .. } => Some(contact),
            Mutation::RenameTag { .. } => None,
        }
    }

    /// Short human-readable target, e.g. the tag name or new status.
    pub fn target(&self) -> String {
        match self {
            Mutation::Create { .. } | Mutation::Update { .. } | Mutation::Archive { .. } => {
                String::new()
            }
            Mutation::ApplyTag { tag, .. } | Mutation::RemoveTag { tag, .. } => tag.to_string(),
            Mutation::RenameTag { tag_id, from, to } => format!("{tag_id}:{from}->{to}"),
            Mutation::SetStatus { status, .. } => status.to_string(),
        }
    }

    /// Stable SHA-256 key over kind, contact and target.
    ///
    /// Field payloads are deliberately left out: two updates of the same
    /// contact in one pass correlate to the same key.
    pub fn idempotency_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind().as_str().as_bytes());
        hasher.update(b"\0");
        if let Some(contact) = self.contact() {
            hasher.update(contact.as_str().as_bytes());
        }
        hasher.update(b"\0");
        hasher.update(self.target().as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = self.target();
        match (self.contact(), target.is_empty()) {
            (Some(c), true) => write!(f, "{} {}", self.kind(), c),
            (Some(c), false) => write!(f, "{} {} [{}]", self.kind(), c, target),
            (None, _) => write!(f, "{} [{}]", self.kind(), target),
        }
    }
}

/// What happened when a mutation was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MutationOutcome {
    Success,
    RetriedSuccess { attempts: u32 },
    PermanentFailure { attempts: u32, error: String },
    /// Dry run: the mutation was planned but not sent.
    WouldApply,
}

impl MutationOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, MutationOutcome::PermanentFailure { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            MutationOutcome::Success => 1,
            MutationOutcome::RetriedSuccess { attempts }
            | MutationOutcome::PermanentFailure { attempts, .. } => *attempts,
            MutationOutcome::WouldApply => 0,
        }
    }
}
