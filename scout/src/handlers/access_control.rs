//! Reconstructs OpenZeppelin `AccessControl` role membership from the
//! granted/revoked event history.

use crate::errors::ErrorKind;
use ethers_core::{
    types::{Address, Filter, Log, H256},
    utils::keccak256,
};
use once_cell::sync::Lazy;
use scout_common::{ContractValue, DiscoveryProvider};
use std::collections::{BTreeMap, BTreeSet};

static ROLE_GRANTED_TOPIC: Lazy<H256> =
    Lazy::new(|| H256::from(keccak256("RoleGranted(bytes32,address,address)")));
static ROLE_REVOKED_TOPIC: Lazy<H256> =
    Lazy::new(|| H256::from(keccak256("RoleRevoked(bytes32,address,address)")));

/// Replays role events in `(block, logIndex)` order into the current
/// role → members map. Returns the field value and the flat `(role, member)`
/// pairs used to put `roles` on EOA entries.
pub async fn execute(
    provider: &dyn DiscoveryProvider,
    address: Address,
    role_names: &BTreeMap<String, String>,
    pick_role_members: Option<&str>,
) -> Result<(ContractValue, Vec<(String, Address)>), ErrorKind> {
    let mut logs = Vec::new();
    for topic in [*ROLE_GRANTED_TOPIC, *ROLE_REVOKED_TOPIC] {
        let filter = Filter::new().address(address).topic0(topic);
        logs.extend(
            provider
                .get_logs(&filter)
                .await
                .map_err(|err| ErrorKind::Rpc(err.to_string()))?,
        );
    }
    logs.sort_by_key(log_position);

    let mut members: BTreeMap<String, BTreeSet<Address>> = BTreeMap::new();
    for log in &logs {
        let (Some(topic0), Some(role), Some(account)) =
            (log.topics.first(), log.topics.get(1), log.topics.get(2))
        else {
            continue;
        };
        let label = role_label(*role, role_names);
        let account = Address::from_slice(&account.as_bytes()[12..]);

        if *topic0 == *ROLE_GRANTED_TOPIC {
            members.entry(label).or_default().insert(account);
        } else if let Some(holders) = members.get_mut(&label) {
            holders.remove(&account);
        }
    }
    members.retain(|_, holders| !holders.is_empty());

    let grants: Vec<(String, Address)> = members
        .iter()
        .flat_map(|(label, holders)| holders.iter().map(|holder| (label.clone(), *holder)))
        .collect();

    let value = match pick_role_members {
        Some(role) => ContractValue::Array(
            members
                .get(role)
                .into_iter()
                .flatten()
                .map(|holder| ContractValue::Address(*holder))
                .collect(),
        ),
        None => ContractValue::Object(
            members
                .into_iter()
                .map(|(label, holders)| {
                    (
                        label,
                        ContractValue::Array(
                            holders.into_iter().map(ContractValue::Address).collect(),
                        ),
                    )
                })
                .collect(),
        ),
    };

    Ok((value, grants))
}

fn role_label(role: H256, role_names: &BTreeMap<String, String>) -> String {
    let hex = format!("{role:?}");
    if let Some(label) = role_names.get(&hex) {
        return label.clone()
    }
    if role == H256::zero() {
        return "DEFAULT_ADMIN_ROLE".to_string()
    }
    hex
}

pub(crate) fn log_position(log: &Log) -> (u64, u64) {
    (
        log.block_number.map(|n| n.as_u64()).unwrap_or_default(),
        log.log_index.map(|n| n.as_u64()).unwrap_or_default(),
    )
}
