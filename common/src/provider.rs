//! The read-only provider capability consumed by the discovery engine.
//!
//! Every read is pinned to a single block so that a run is a pure function of
//! `(config, block, chain state)`.

use async_trait::async_trait;
use ethers_core::types::{
    Address, BlockId, Bytes, Filter, FilterBlockOption, Log, TransactionRequest, H256,
};
use ethers_providers::{Middleware, ProviderError};
use parking_lot::RwLock;
use std::{collections::HashMap, fmt, sync::Arc};
use tokio::sync::Semaphore;
use tracing::trace;

/// Default number of outstanding RPC requests across the whole engine.
pub const DEFAULT_CONCURRENCY: usize = 25;

pub type RpcResult<T> = Result<T, RpcError>;

/// Errors surfaced by a [`DiscoveryProvider`].
///
/// Transport retries happen below this layer; an error here is either a
/// revert (meaningful to handlers that probe until failure) or a call whose
/// retries were exhausted.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("execution reverted: {0}")]
    Revert(String),
    #[error("{0}")]
    Other(String),
}

impl RpcError {
    /// Whether the error represents a reverted `eth_call`.
    pub fn is_revert(&self) -> bool {
        match self {
            Self::Revert(_) => true,
            Self::Provider(err) => err.to_string().contains("revert"),
            Self::Other(msg) => msg.contains("revert"),
        }
    }

    pub(crate) fn from_middleware<E: fmt::Display>(err: E) -> Self {
        let msg = err.to_string();
        if msg.contains("revert") {
            Self::Revert(msg)
        } else {
            Self::Other(msg)
        }
    }
}

/// Read access to chain state at the run's pinned block.
///
/// The engine only ever consumes this capability; production code hands it a
/// [`PinnedClient`], tests hand it a fixture.
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    /// The block every read is pinned to.
    fn block_number(&self) -> u64;

    async fn get_code(&self, address: Address) -> RpcResult<Bytes>;

    async fn get_storage(&self, address: Address, slot: H256) -> RpcResult<H256>;

    async fn call(&self, to: Address, data: Bytes) -> RpcResult<Bytes>;

    async fn get_logs(&self, filter: &Filter) -> RpcResult<Vec<Log>>;
}

/// A [`Middleware`] pinned to one block, with a request gate and per-run
/// caches for the reads the engine repeats (code and storage).
#[derive(Debug)]
pub struct PinnedClient<M> {
    inner: Arc<M>,
    block_number: u64,
    permits: Semaphore,
    cache: RwLock<PinnedCache>,
}

#[derive(Debug, Default)]
struct PinnedCache {
    code_at: HashMap<Address, Bytes>,
    storage: HashMap<(Address, H256), H256>,
}

impl<M: Middleware> PinnedClient<M> {
    pub fn new(inner: M, block_number: u64) -> Self {
        Self::with_concurrency(inner, block_number, DEFAULT_CONCURRENCY)
    }

    /// Caps the number of outstanding requests at `concurrency`.
    pub fn with_concurrency(inner: M, block_number: u64, concurrency: usize) -> Self {
        Self {
            inner: Arc::new(inner),
            block_number,
            permits: Semaphore::new(concurrency.max(1)),
            cache: RwLock::new(PinnedCache::default()),
        }
    }

    /// Pins to the current head of the chain.
    pub async fn latest(inner: M) -> RpcResult<Self> {
        let block_number = inner
            .get_block_number()
            .await
            .map_err(RpcError::from_middleware)?
            .as_u64();
        Ok(Self::new(inner, block_number))
    }

    fn block_id(&self) -> Option<BlockId> {
        Some(self.block_number.into())
    }

    async fn acquire(&self) -> RpcResult<tokio::sync::SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|err| RpcError::Other(err.to_string()))
    }
}

#[async_trait]
impl<M: Middleware + 'static> DiscoveryProvider for PinnedClient<M> {
    fn block_number(&self) -> u64 {
        self.block_number
    }

    async fn get_code(&self, address: Address) -> RpcResult<Bytes> {
        if let Some(code) = self.cache.read().code_at.get(&address).cloned() {
            return Ok(code)
        }

        let _permit = self.acquire().await?;
        trace!(target: "scout::provider", ?address, "eth_getCode");
        let code = self
            .inner
            .get_code(address, self.block_id())
            .await
            .map_err(RpcError::from_middleware)?;
        self.cache.write().code_at.insert(address, code.clone());

        Ok(code)
    }

    async fn get_storage(&self, address: Address, slot: H256) -> RpcResult<H256> {
        if let Some(value) = self.cache.read().storage.get(&(address, slot)).copied() {
            return Ok(value)
        }

        let _permit = self.acquire().await?;
        trace!(target: "scout::provider", ?address, ?slot, "eth_getStorageAt");
        let value = self
            .inner
            .get_storage_at(address, slot, self.block_id())
            .await
            .map_err(RpcError::from_middleware)?;
        self.cache.write().storage.insert((address, slot), value);

        Ok(value)
    }

    async fn call(&self, to: Address, data: Bytes) -> RpcResult<Bytes> {
        let _permit = self.acquire().await?;
        trace!(target: "scout::provider", ?to, calldata = %data, "eth_call");
        let tx = TransactionRequest::new().to(to).data(data);
        self.inner
            .call(&tx.into(), self.block_id())
            .await
            .map_err(RpcError::from_middleware)
    }

    async fn get_logs(&self, filter: &Filter) -> RpcResult<Vec<Log>> {
        let _permit = self.acquire().await?;
        let filter = pin_filter(filter.clone(), self.block_number);
        trace!(target: "scout::provider", ?filter, "eth_getLogs");
        self.inner.get_logs(&filter).await.map_err(RpcError::from_middleware)
    }
}

/// Clamps a log filter to `[genesis, block]` unless the caller asked for a
/// narrower range below the pinned block.
pub fn pin_filter(mut filter: Filter, block_number: u64) -> Filter {
    filter.block_option = match filter.block_option {
        FilterBlockOption::Range { from_block, to_block } => {
            let to_block = match to_block {
                Some(requested) if block_of(&requested).map_or(false, |b| b <= block_number) => {
                    requested
                }
                _ => block_number.into(),
            };
            FilterBlockOption::Range {
                from_block: Some(from_block.unwrap_or_else(|| 0u64.into())),
                to_block: Some(to_block),
            }
        }
        at => at,
    };
    filter
}

fn block_of(block: &ethers_core::types::BlockNumber) -> Option<u64> {
    block.as_number().map(|n| n.as_u64())
}
