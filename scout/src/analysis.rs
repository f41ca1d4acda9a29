//! The per-address analysis record.
//!
//! One [`Analysis`] is produced for every discovered address and lives for a
//! single run. Relatives are referenced by address value, never by pointer,
//! so cyclic address graphs cannot create cyclic data.

use crate::errors::ErrorKind;
use ethers_core::types::{Address, H256};
use scout_common::ContractValue;
use scout_config::ManualProxyType;
use std::collections::{BTreeMap, BTreeSet};

/// Everything the engine learned about one address.
#[derive(Clone, Debug)]
pub enum Analysis {
    Eoa(EoaAnalysis),
    Contract(Box<ContractAnalysis>),
}

impl Analysis {
    pub fn address(&self) -> Address {
        match self {
            Self::Eoa(eoa) => eoa.address,
            Self::Contract(contract) => contract.address,
        }
    }

    pub fn as_contract(&self) -> Option<&ContractAnalysis> {
        match self {
            Self::Contract(contract) => Some(contract),
            Self::Eoa(_) => None,
        }
    }
}

/// An address with no code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EoaAnalysis {
    pub address: Address,
}

/// A fully analyzed contract.
#[derive(Clone, Debug, Default)]
pub struct ContractAnalysis {
    pub address: Address,
    /// Verifier-reported name; a proxy is named after its implementation.
    pub name: Option<String>,
    /// `None` means not a proxy.
    pub proxy_type: Option<ManualProxyType>,
    pub implementations: Vec<Address>,
    pub values: BTreeMap<String, ContractValue>,
    pub errors: BTreeMap<String, ErrorKind>,
    /// Addresses this contract references, each with the template hints its
    /// discovering fields attached.
    pub relatives: BTreeMap<Address, BTreeSet<String>>,
    pub ignore_in_watch_mode: Vec<String>,
    pub can_act_independently: Option<bool>,
    pub template_id: Option<String>,
    pub source_hashes: Vec<H256>,
    /// `(role, member)` pairs harvested by access-control handlers; the
    /// materializer turns these into `roles` on EOA entries.
    pub role_grants: Vec<(String, Address)>,
}
