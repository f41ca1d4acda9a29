//! Aggregated error type for configuration loading.

use std::path::PathBuf;

/// Errors that abort a run before any chain access happens.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("duplicate key `{key}` in {path}")]
    DuplicateKey { path: PathBuf, key: String },
    #[error("invalid configuration: {0}")]
    Schema(String),
    #[error("cyclic reference: {0}")]
    Cycle(String),
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub(crate) fn from_jsonc(path: impl Into<PathBuf>, err: crate::jsonc::JsoncError) -> Self {
        match err {
            crate::jsonc::JsoncError::DuplicateKey(key) => {
                Self::DuplicateKey { path: path.into(), key }
            }
            crate::jsonc::JsoncError::Syntax(message) => Self::Parse { path: path.into(), message },
        }
    }
}
