//! The breadth-first traversal core.
//!
//! Level-synchronous BFS over the address graph: the whole frontier is
//! analyzed concurrently, then the next frontier is built from the returned
//! relatives. All traversal state is touched strictly between levels, so no
//! locking is needed anywhere in the engine.

use crate::{
    analysis::Analysis,
    analyzer::AddressAnalyzer,
    errors::DiscoveryError,
};
use ethers_core::types::Address;
use futures::future::join_all;
use scout_common::DiscoveryProvider;
use scout_config::StructureConfig;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

/// The result of one discovery run.
#[derive(Debug)]
pub struct DiscoveryOutcome {
    /// Completed analyses, ordered by address ascending.
    pub analyses: Vec<Analysis>,
    /// Relatives dropped because `maxAddresses` was reached, ordered by
    /// address ascending. Empty on cap-clean runs.
    pub dropped: Vec<Address>,
}

pub struct DiscoveryEngine {
    analyzer: AddressAnalyzer,
}

impl DiscoveryEngine {
    pub fn new(analyzer: AddressAnalyzer) -> Self {
        Self { analyzer }
    }

    /// Discovers the system reachable from the config's seeds.
    ///
    /// Terminates on every input: the resolved set breaks reference cycles,
    /// `maxDepth` bounds the traversal depth and `maxAddresses` bounds its
    /// width. The output is a pure function of `(config, block, chain
    /// state)`.
    pub async fn discover(
        &self,
        provider: &dyn DiscoveryProvider,
        config: &StructureConfig,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        let mut resolved: BTreeMap<Address, Analysis> = BTreeMap::new();
        let mut to_analyze: BTreeMap<Address, BTreeSet<String>> = BTreeMap::new();
        let mut depth: HashMap<Address, usize> = HashMap::new();
        let mut dropped: BTreeSet<Address> = BTreeSet::new();

        for seed in &config.initial_addresses {
            if to_analyze.len() >= config.max_addresses {
                warn!(target: "scout::engine", ?seed, "address cap reached, dropping seed");
                dropped.insert(*seed);
                continue;
            }
            to_analyze.entry(*seed).or_default();
            depth.insert(*seed, 0);
        }

        let mut level = 0usize;
        while !to_analyze.is_empty() {
            let frontier: Vec<(Address, BTreeSet<String>)> =
                std::mem::take(&mut to_analyze).into_iter().collect();
            debug!(target: "scout::engine", level, size = frontier.len(), "analyzing frontier");

            let results = join_all(frontier.iter().map(|(address, hints)| {
                self.analyzer.analyze(provider, *address, hints, config)
            }))
            .await;

            let mut completed = Vec::with_capacity(frontier.len());
            for ((address, _), result) in frontier.into_iter().zip(results) {
                let analysis = result?;
                if resolved.insert(address, analysis).is_some() {
                    return Err(DiscoveryError::Internal(format!(
                        "address {address:#x} analyzed twice"
                    )))
                }
                completed.push(address);
            }

            // build the next frontier; iteration is address-ordered so cap
            // drops are deterministic
            for address in completed {
                let Some(contract) = resolved[&address].as_contract() else { continue };
                let next_depth = depth.get(&address).copied().unwrap_or_default() + 1;

                for (relative, hints) in &contract.relatives {
                    if resolved.contains_key(relative) {
                        continue;
                    }
                    if config.max_depth.is_some_and(|max| next_depth > max) {
                        debug!(target: "scout::engine", ?relative, "beyond maxDepth, skipping");
                        continue;
                    }
                    if !to_analyze.contains_key(relative) &&
                        resolved.len() + to_analyze.len() >= config.max_addresses
                    {
                        warn!(
                            target: "scout::engine",
                            ?relative,
                            cap = config.max_addresses,
                            "address cap reached, dropping relative"
                        );
                        dropped.insert(*relative);
                        continue;
                    }
                    to_analyze.entry(*relative).or_default().extend(hints.iter().cloned());
                    depth.entry(*relative).or_insert(next_depth);
                }
            }

            level += 1;
        }

        Ok(DiscoveryOutcome {
            analyses: resolved.into_values().collect(),
            dropped: dropped.into_iter().collect(),
        })
    }
}
