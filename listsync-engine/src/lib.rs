//! # listsync-engine
//!
//! Bidirectional contact reconciliation between a CRM and an email audience.
//!
//! [`pipeline::run`] drives one pass: list snapshots feed the
//! [`desired`] state, the [`planner`] diffs it against what the destination
//! holds, and the [`executor`] applies the resulting mutations with retry and
//! backoff. List renames are carried over by the [`rename`] resolver.
//!
//! Platforms are reached only through the [`platform`] traits. The `testing`
//! feature adds in-memory implementations.

pub mod clock;
pub mod desired;
pub mod error;
pub mod executor;
pub mod history;
pub mod name_map;
pub mod pacing;
pub mod pipeline;
pub mod planner;
pub mod platform;
pub mod rename;
pub mod report;
pub mod retry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EngineError, PlatformError, PlatformErrorKind};
pub use pacing::Pacer;
pub use pipeline::{run, Platforms, RunOptions};
pub use platform::{DestinationMutator, MembershipPage, RecordStream, SourceLister};
pub use report::{Direction, RunReport};
pub use retry::RetryPolicy;
