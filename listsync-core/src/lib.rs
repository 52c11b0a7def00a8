//! listsync core library: domain types, the mutation model, configuration.
//!
//! - [`types`]: newtypes, `Email`, contact records
//! - [`mutation`]: [`Mutation`] and [`MutationOutcome`]
//! - [`config`]: `listsync.yaml` loading and validation
//! - [`error`]: [`ConfigError`], [`EmailError`]

pub mod config;
pub mod error;
pub mod mutation;
pub mod types;

pub use config::{ConfigReport, SyncConfig};
pub use error::{ConfigError, EmailError};
pub use mutation::{Mutation, MutationKind, MutationOutcome};
pub use types::{
    format_origin, parse_origin, ContactStatus, DestinationRecord, Email, Fields, ListId,
    MemberId, NewRecord, RecordId, SourceContact, TagId, TagName, TagRef,
};
