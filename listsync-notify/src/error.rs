//! Error types for listsync-notify.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from rendering or delivering a run summary.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Tera template engine error.
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),

    /// JSON serialization error (building the tera context or parsing a card).
    #[error("context serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error while loading user templates.
    #[error("template io error at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    /// The webhook rejected the card or could not be reached.
    #[error("webhook delivery failed: {0}")]
    Webhook(String),
}
