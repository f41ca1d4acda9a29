//! Shared building blocks for the scout discovery pipeline: the provider
//! capability consumed by the engine, the source-code service, and the
//! runtime value type produced by handlers.

/// deterministic in-memory provider and source fixtures
pub mod fixture;
/// the read-only, block-pinned provider capability
pub mod provider;
/// verified source code fetching and hashing
pub mod source;
/// the recursive value type produced by handlers
pub mod value;

pub use provider::{DiscoveryProvider, PinnedClient, RpcError, RpcResult, DEFAULT_CONCURRENCY};
pub use source::{
    ContractSources, EtherscanSourceService, OfflineSourceService, SourceCodeService, SourceError,
    SourceLayer,
};
pub use value::ContractValue;
