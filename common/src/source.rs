//! Verified source code fetching.
//!
//! Contracts are matched to templates by the keccak hash of their
//! canonicalized verified source, so hashing lives here next to the fetch.

use async_trait::async_trait;
use ethers_core::{
    abi::Abi,
    types::{Address, Bytes, H256},
    utils::keccak256,
};
use ethers_etherscan::{errors::EtherscanError, Client};
use tracing::{debug, warn};

/// Errors surfaced by a [`SourceCodeService`].
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Etherscan(#[from] EtherscanError),
    #[error("{0}")]
    Other(String),
}

/// One layer of a contract's source: the proxy shell is layer 0,
/// implementations follow in proxy-detection order.
#[derive(Clone, Debug, Default)]
pub struct SourceLayer {
    /// Contract name reported by the verifier, if any.
    pub name: Option<String>,
    /// Canonicalized concatenated verified source.
    pub source: String,
    /// keccak256 of [`SourceLayer::source`]; `None` when unverified.
    pub hash: Option<H256>,
    pub abi: Option<Abi>,
    /// ABI-encoded creation arguments as recorded by the verifier.
    pub constructor_arguments: Option<Bytes>,
}

impl SourceLayer {
    /// A placeholder for a contract whose source is not verified.
    pub fn unverified() -> Self {
        Self::default()
    }

    pub fn is_verified(&self) -> bool {
        self.hash.is_some()
    }
}

/// Everything the analyzer knows about a contract's source.
#[derive(Clone, Debug, Default)]
pub struct ContractSources {
    pub layers: Vec<SourceLayer>,
}

impl ContractSources {
    /// Shape hashes of the verified layers, shell first.
    pub fn hashes(&self) -> Vec<H256> {
        self.layers.iter().filter_map(|layer| layer.hash).collect()
    }

    /// The ABIs of all layers merged into one, later layers extending
    /// earlier ones. A proxy is called through its implementation's ABI, so
    /// handlers see both.
    pub fn abi(&self) -> Option<Abi> {
        let mut merged: Option<Abi> = None;
        for layer in &self.layers {
            let Some(abi) = &layer.abi else { continue };
            let merged = merged.get_or_insert_with(Abi::default);
            if abi.constructor.is_some() {
                merged.constructor = abi.constructor.clone();
            }
            for (name, functions) in &abi.functions {
                merged.functions.insert(name.clone(), functions.clone());
            }
            for (name, events) in &abi.events {
                merged.events.insert(name.clone(), events.clone());
            }
            for (name, errors) in &abi.errors {
                merged.errors.insert(name.clone(), errors.clone());
            }
        }
        merged
    }

    /// The contract's display name: the last verified layer wins, so a proxy
    /// is named after its implementation.
    pub fn name(&self) -> Option<&str> {
        self.layers.iter().rev().find_map(|layer| layer.name.as_deref())
    }
}

/// Capability that resolves an address (and its proxy implementations) to
/// verified source, ABIs and shape hashes.
#[async_trait]
pub trait SourceCodeService: Send + Sync {
    async fn fetch(
        &self,
        address: Address,
        implementations: &[Address],
    ) -> Result<ContractSources, SourceError>;
}

/// Normalizes verified source for hashing: line endings unified, trailing
/// whitespace per line dropped.
pub fn canonicalize_source(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for line in source.replace("\r\n", "\n").replace('\r', "\n").lines() {
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// The shape hash of one source layer.
pub fn source_hash(source: &str) -> H256 {
    H256::from(keccak256(canonicalize_source(source)))
}

/// Source service for runs without an explorer configured: every contract
/// reads as unverified, so handlers that need an ABI report `MissingAbi`
/// instead of failing the run.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineSourceService;

#[async_trait]
impl SourceCodeService for OfflineSourceService {
    async fn fetch(
        &self,
        _address: Address,
        implementations: &[Address],
    ) -> Result<ContractSources, SourceError> {
        Ok(ContractSources {
            layers: vec![SourceLayer::unverified(); 1 + implementations.len()],
        })
    }
}

/// Fetches verified source from an Etherscan-compatible explorer.
pub struct EtherscanSourceService {
    client: Client,
}

impl EtherscanSourceService {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_layer(&self, address: Address) -> Result<SourceLayer, SourceError> {
        let metadata = match self.client.contract_source_code(address).await {
            Ok(metadata) => metadata,
            Err(EtherscanError::ContractCodeNotVerified(_)) => {
                debug!(target: "scout::source", ?address, "source not verified");
                return Ok(SourceLayer::unverified())
            }
            Err(err) => return Err(err.into()),
        };

        let Some(item) = metadata.items.first() else { return Ok(SourceLayer::unverified()) };

        let source = canonicalize_source(&item.source_code());
        let abi = match serde_json::from_str::<Abi>(&item.abi) {
            Ok(abi) => Some(abi),
            Err(err) => {
                // Etherscan reports unverified contracts with a sentinel
                // string in the abi field.
                warn!(target: "scout::source", ?address, %err, "could not parse verified abi");
                None
            }
        };

        Ok(SourceLayer {
            name: Some(item.contract_name.clone()),
            hash: Some(H256::from(keccak256(&source))),
            source,
            abi,
            constructor_arguments: Some(item.constructor_arguments.clone()),
        })
    }
}

#[async_trait]
impl SourceCodeService for EtherscanSourceService {
    async fn fetch(
        &self,
        address: Address,
        implementations: &[Address],
    ) -> Result<ContractSources, SourceError> {
        let mut layers = Vec::with_capacity(1 + implementations.len());
        layers.push(self.fetch_layer(address).await?);
        for implementation in implementations {
            layers.push(self.fetch_layer(*implementation).await?);
        }
        Ok(ContractSources { layers })
    }
}
