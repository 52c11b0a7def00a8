//! Error types for listsync-engine.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use listsync_core::ConfigError;

/// Classification of a failed platform call. Drives retry and abort decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformErrorKind {
    /// Timeout, connection reset, 5xx.
    Transient,
    /// 429; may carry a retry-after hint.
    RateLimited,
    /// The platform rejected the payload.
    Validation,
    NotFound,
    /// A destination field referenced by the payload does not exist.
    MissingField,
    /// Bad or expired credentials.
    Auth,
    /// The platform has no primitive for this operation.
    Unsupported,
}

impl PlatformErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformErrorKind::Transient => "transient",
            PlatformErrorKind::RateLimited => "rate_limited",
            PlatformErrorKind::Validation => "validation",
            PlatformErrorKind::NotFound => "not_found",
            PlatformErrorKind::MissingField => "missing_field",
            PlatformErrorKind::Auth => "auth",
            PlatformErrorKind::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for PlatformErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure from a source or destination platform call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
    pub message: String,
    /// Server-provided delay before the next attempt (rate limits only).
    pub retry_after: Option<Duration>,
    /// Name of the missing field for [`PlatformErrorKind::MissingField`].
    pub field: Option<String>,
}

impl PlatformError {
    pub fn new(kind: PlatformErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
            field: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(PlatformErrorKind::Transient, message)
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(PlatformErrorKind::RateLimited, "rate limit exceeded")
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(PlatformErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(PlatformErrorKind::NotFound, message)
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            field: Some(field.clone()),
            ..Self::new(PlatformErrorKind::MissingField, format!("field '{field}' does not exist"))
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(PlatformErrorKind::Auth, message)
    }

    pub fn unsupported(operation: &str) -> Self {
        Self::new(PlatformErrorKind::Unsupported, format!("{operation} is not supported"))
    }

    /// Worth another attempt after a delay.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            PlatformErrorKind::Transient | PlatformErrorKind::RateLimited
        )
    }
}

/// All errors that can end an engine run early.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Credentials were rejected. Aborts the run.
    #[error("authentication failed: {0}")]
    Auth(PlatformError),

    /// A platform could not be reached when access was verified. Aborts the run.
    #[error("platform unavailable: {0}")]
    Unreachable(PlatformError),

    /// Destination schema could not be repaired. Aborts the run.
    #[error("structural error: {0}")]
    Structural(String),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Aborts stop the run but still produce a report.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            EngineError::Auth(_) | EngineError::Unreachable(_) | EngineError::Structural(_)
        )
    }
}

/// Convenience constructor for [`EngineError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> EngineError {
    EngineError::Io {
        path: path.into(),
        source,
    }
}
