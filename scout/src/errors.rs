//! Error types of the discovery pipeline.
//!
//! Per-field failures are data: they end up in a contract's `errors` map and
//! the run continues. Only structural problems (bad configuration, an
//! unusable provider, broken engine invariants) abort a run.

use scout_config::ConfigError;
use serde::{Serialize, Serializer};
use std::fmt;

/// A per-field failure, recorded next to the values that did resolve.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The contract's source is unverified or carries no usable ABI.
    MissingAbi,
    /// The handler itself failed: revert, undecodable value, bad slot path.
    Handler(String),
    /// The provider gave up on this call after its retries.
    Rpc(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAbi => f.write_str("missing ABI"),
            Self::Handler(msg) => write!(f, "handler error: {msg}"),
            Self::Rpc(msg) => write!(f, "rpc error: {msg}"),
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// A failure that aborts the whole run.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The provider could not serve a read the engine cannot do without.
    #[error("provider failure: {0}")]
    Provider(String),
    /// Broken engine invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_serialize_as_messages() {
        assert_eq!(serde_json::to_value(ErrorKind::MissingAbi).unwrap(), "missing ABI");
        assert_eq!(
            serde_json::to_value(ErrorKind::Handler("reverted".to_string())).unwrap(),
            "handler error: reverted"
        );
    }
}
