//! Deterministic in-memory fixtures.
//!
//! A [`FixtureProvider`] plays back a pinned snapshot of chain state, which
//! makes runs reproducible without a node: the integration suite and offline
//! replays both use it.

use crate::{
    provider::{pin_filter, DiscoveryProvider, RpcError, RpcResult},
    source::{canonicalize_source, ContractSources, SourceCodeService, SourceError, SourceLayer},
};
use async_trait::async_trait;
use ethers_core::{
    abi::Abi,
    types::{Address, BlockNumber, Bytes, Filter, FilterBlockOption, Log, ValueOrArray, H256},
    utils::keccak256,
};
use std::collections::HashMap;

#[derive(Clone, Debug)]
enum CallOutcome {
    Return(Bytes),
    Revert(String),
}

/// Chain state served from memory at a fixed block.
#[derive(Debug, Default)]
pub struct FixtureProvider {
    block_number: u64,
    code: HashMap<Address, Bytes>,
    storage: HashMap<(Address, H256), H256>,
    calls: HashMap<(Address, Bytes), CallOutcome>,
    logs: Vec<Log>,
}

impl FixtureProvider {
    pub fn new(block_number: u64) -> Self {
        Self { block_number, ..Default::default() }
    }

    pub fn set_code(&mut self, address: Address, code: Bytes) -> &mut Self {
        self.code.insert(address, code);
        self
    }

    /// Marks `address` as a contract without caring about its bytecode.
    pub fn deploy(&mut self, address: Address) -> &mut Self {
        self.set_code(address, Bytes::from_static(&[0xfe]))
    }

    pub fn set_storage(&mut self, address: Address, slot: H256, value: H256) -> &mut Self {
        self.storage.insert((address, slot), value);
        self
    }

    pub fn set_call(&mut self, to: Address, data: Bytes, ret: Bytes) -> &mut Self {
        self.calls.insert((to, data), CallOutcome::Return(ret));
        self
    }

    pub fn set_revert(&mut self, to: Address, data: Bytes, reason: &str) -> &mut Self {
        self.calls.insert((to, data), CallOutcome::Revert(reason.to_string()));
        self
    }

    pub fn push_log(&mut self, log: Log) -> &mut Self {
        self.logs.push(log);
        self
    }

    /// Appends a log with the fields the engine inspects.
    pub fn push_raw_log(
        &mut self,
        address: Address,
        topics: Vec<H256>,
        data: Bytes,
        block_number: u64,
        log_index: u64,
    ) -> &mut Self {
        self.push_log(Log {
            address,
            topics,
            data,
            block_number: Some(block_number.into()),
            log_index: Some(log_index.into()),
            ..Default::default()
        })
    }
}

#[async_trait]
impl DiscoveryProvider for FixtureProvider {
    fn block_number(&self) -> u64 {
        self.block_number
    }

    async fn get_code(&self, address: Address) -> RpcResult<Bytes> {
        Ok(self.code.get(&address).cloned().unwrap_or_default())
    }

    async fn get_storage(&self, address: Address, slot: H256) -> RpcResult<H256> {
        Ok(self.storage.get(&(address, slot)).copied().unwrap_or_default())
    }

    async fn call(&self, to: Address, data: Bytes) -> RpcResult<Bytes> {
        match self.calls.get(&(to, data)) {
            Some(CallOutcome::Return(ret)) => Ok(ret.clone()),
            Some(CallOutcome::Revert(reason)) => Err(RpcError::Revert(reason.clone())),
            None => Err(RpcError::Revert("fixture: no response configured".to_string())),
        }
    }

    async fn get_logs(&self, filter: &Filter) -> RpcResult<Vec<Log>> {
        let filter = pin_filter(filter.clone(), self.block_number);
        Ok(self.logs.iter().filter(|log| log_matches(&filter, log)).cloned().collect())
    }
}

fn log_matches(filter: &Filter, log: &Log) -> bool {
    if let FilterBlockOption::Range { from_block, to_block } = &filter.block_option {
        let number = log.block_number.map(|n| n.as_u64()).unwrap_or_default();
        if let Some(from) = from_block.as_ref().and_then(block_number_of) {
            if number < from {
                return false;
            }
        }
        if let Some(to) = to_block.as_ref().and_then(block_number_of) {
            if number > to {
                return false;
            }
        }
    }

    match &filter.address {
        Some(ValueOrArray::Value(address)) if *address != log.address => return false,
        Some(ValueOrArray::Array(addresses)) if !addresses.contains(&log.address) => return false,
        _ => {}
    }

    filter.topics.iter().enumerate().all(|(i, topic)| match topic {
        None => true,
        Some(ValueOrArray::Value(None)) => true,
        Some(ValueOrArray::Value(Some(expected))) => log.topics.get(i) == Some(expected),
        Some(ValueOrArray::Array(options)) => options
            .iter()
            .any(|option| option.map_or(true, |expected| log.topics.get(i) == Some(&expected))),
    })
}

fn block_number_of(block: &BlockNumber) -> Option<u64> {
    block.as_number().map(|n| n.as_u64())
}

/// In-memory counterpart of the Etherscan service.
#[derive(Debug, Default)]
pub struct FixtureSourceService {
    entries: HashMap<Address, SourceLayer>,
}

impl FixtureSourceService {
    /// Registers verified source for `address`.
    pub fn insert(
        &mut self,
        address: Address,
        name: &str,
        source: &str,
        abi: Option<Abi>,
    ) -> &mut Self {
        let source = canonicalize_source(source);
        self.entries.insert(
            address,
            SourceLayer {
                name: Some(name.to_string()),
                hash: Some(H256::from(keccak256(&source))),
                source,
                abi,
                constructor_arguments: None,
            },
        );
        self
    }

    pub fn set_constructor_arguments(&mut self, address: Address, args: Bytes) -> &mut Self {
        if let Some(layer) = self.entries.get_mut(&address) {
            layer.constructor_arguments = Some(args);
        }
        self
    }
}

#[async_trait]
impl SourceCodeService for FixtureSourceService {
    async fn fetch(
        &self,
        address: Address,
        implementations: &[Address],
    ) -> Result<ContractSources, SourceError> {
        let layer = |address: &Address| {
            self.entries.get(address).cloned().unwrap_or_else(SourceLayer::unverified)
        };
        let mut layers = vec![layer(&address)];
        layers.extend(implementations.iter().map(|implementation| layer(implementation)));
        Ok(ContractSources { layers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    #[tokio::test]
    async fn unknown_accounts_read_as_empty() {
        let provider = FixtureProvider::new(1);
        assert!(provider.get_code(addr(1)).await.unwrap().is_empty());
        assert_eq!(provider.get_storage(addr(1), H256::zero()).await.unwrap(), H256::zero());
    }

    #[tokio::test]
    async fn unconfigured_calls_revert() {
        let provider = FixtureProvider::new(1);
        let err = provider.call(addr(1), Bytes::default()).await.unwrap_err();
        assert!(err.is_revert());
    }

    #[tokio::test]
    async fn logs_filter_by_address_and_topic() {
        let topic = H256::from(keccak256("Ping()"));
        let other = H256::from(keccak256("Pong()"));
        let mut provider = FixtureProvider::new(10);
        provider
            .push_raw_log(addr(1), vec![topic], Bytes::default(), 1, 0)
            .push_raw_log(addr(1), vec![other], Bytes::default(), 2, 0)
            .push_raw_log(addr(2), vec![topic], Bytes::default(), 3, 0);

        let filter = Filter::new().address(addr(1)).topic0(topic);
        let logs = provider.get_logs(&filter).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].address, addr(1));
    }

    #[tokio::test]
    async fn logs_beyond_the_pinned_block_are_invisible() {
        let mut provider = FixtureProvider::new(5);
        provider.push_raw_log(addr(1), vec![], Bytes::default(), 9, 0);
        assert!(provider.get_logs(&Filter::new()).await.unwrap().is_empty());
    }
}
