//! Materializes the final artifact.
//!
//! The artifact is a pure function of `(config, block, analyses)`: entries
//! are sorted by address, value maps are ordered, and serialization has no
//! nondeterministic inputs, so identical runs produce identical bytes.

use crate::{analysis::Analysis, errors::ErrorKind};
use ethers_core::types::{Address, H256};
use scout_common::ContractValue;
use scout_config::{ManualProxyType, StructureConfig};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// The emitted artifact.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryOutput {
    pub name: String,
    pub chain: String,
    /// The block every read was pinned to.
    pub block_number: u64,
    pub entries: Vec<OutputEntry>,
    /// Unrecognized config keys, passed through unchanged.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One discovered account.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum OutputEntry {
    #[serde(rename = "EOA", rename_all = "camelCase")]
    Eoa {
        address: Address,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        roles: Vec<String>,
    },
    #[serde(rename = "Contract", rename_all = "camelCase")]
    Contract {
        address: Address,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        proxy_type: Option<ManualProxyType>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        implementations: Vec<Address>,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        values: BTreeMap<String, ContractValue>,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        errors: BTreeMap<String, ErrorKind>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        ignore_in_watch_mode: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        can_act_independently: Option<bool>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        source_hashes: Vec<H256>,
    },
}

impl OutputEntry {
    pub fn address(&self) -> Address {
        match self {
            Self::Eoa { address, .. } | Self::Contract { address, .. } => *address,
        }
    }
}

/// Shapes completed analyses into the artifact.
pub fn materialize(
    config: &StructureConfig,
    block_number: u64,
    analyses: &[Analysis],
) -> DiscoveryOutput {
    // EOA roles come from the union of every contract's role grants
    let mut roles: BTreeMap<Address, BTreeSet<String>> = BTreeMap::new();
    for analysis in analyses {
        let Some(contract) = analysis.as_contract() else { continue };
        for (role, member) in &contract.role_grants {
            roles.entry(*member).or_default().insert(role.clone());
        }
    }

    let mut entries: Vec<OutputEntry> = analyses
        .iter()
        .map(|analysis| match analysis {
            Analysis::Eoa(eoa) => OutputEntry::Eoa {
                address: eoa.address,
                roles: roles
                    .get(&eoa.address)
                    .map(|roles| roles.iter().cloned().collect())
                    .unwrap_or_default(),
            },
            Analysis::Contract(contract) => OutputEntry::Contract {
                address: contract.address,
                name: contract.name.clone(),
                proxy_type: contract.proxy_type,
                implementations: contract.implementations.clone(),
                values: contract.values.clone(),
                errors: contract.errors.clone(),
                ignore_in_watch_mode: contract.ignore_in_watch_mode.clone(),
                can_act_independently: contract.can_act_independently,
                source_hashes: contract.source_hashes.clone(),
            },
        })
        .collect();
    entries.sort_by_key(OutputEntry::address);

    DiscoveryOutput {
        name: config.name.clone(),
        chain: config.chain.clone(),
        block_number,
        entries,
        extra: config.extra.clone(),
    }
}

impl DiscoveryOutput {
    /// The artifact as it is written to disk.
    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }
}
