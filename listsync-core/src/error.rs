//! Error types for listsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load. Carries the line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}")]
    NotFound { path: PathBuf },

    /// `dirs::home_dir()` returned `None`, so `~/.listsync/` cannot be located.
    #[error("cannot determine home directory; set $HOME or set state.dir in the config")]
    HomeNotFound,

    /// The config parsed but failed validation.
    #[error("invalid config: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Why an address was rejected by [`crate::Email::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmailError {
    #[error("email is empty")]
    Empty,

    #[error("email '{0}' contains whitespace")]
    Whitespace(String),

    #[error("email '{0}' must contain exactly one '@'")]
    AtSign(String),

    #[error("email '{0}' has an empty local part")]
    EmptyLocal(String),

    #[error("email '{0}' has an invalid domain")]
    Domain(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
