//! Event-derived extractors: `stateFromEvent`, `eventCount` and the
//! Arbitrum data-availability-committee keyset replay.

use crate::{errors::ErrorKind, handlers::access_control::log_position, handlers::decode};
use ethers_core::{
    abi::{Event, HumanReadableParser, RawLog},
    types::{Address, Filter, Log, H256},
    utils::keccak256,
};
use once_cell::sync::Lazy;
use scout_common::{ContractValue, DiscoveryProvider};
use std::collections::{BTreeMap, BTreeSet};

static SET_VALID_KEYSET_TOPIC: Lazy<H256> =
    Lazy::new(|| H256::from(keccak256("SetValidKeyset(bytes32,bytes)")));
static INVALIDATE_KEYSET_TOPIC: Lazy<H256> =
    Lazy::new(|| H256::from(keccak256("InvalidateKeyset(bytes32)")));

/// Decodes the named params of every matching event, in emission order.
/// With `only_latest` just the final state survives.
pub async fn state_from_event(
    provider: &dyn DiscoveryProvider,
    address: Address,
    signature: &str,
    return_params: &[String],
    only_latest: bool,
) -> Result<ContractValue, ErrorKind> {
    let event = parse_event(signature)?;
    let logs = fetch_sorted(provider, address, event.signature()).await?;

    let mut states = Vec::with_capacity(logs.len());
    for log in logs {
        let raw = RawLog { topics: log.topics, data: log.data.to_vec() };
        let decoded = event
            .parse_log(raw)
            .map_err(|err| ErrorKind::Handler(format!("could not decode event: {err}")))?;

        let mut state = BTreeMap::new();
        for name in return_params {
            let param = decoded
                .params
                .iter()
                .find(|param| &param.name == name)
                .ok_or_else(|| {
                    ErrorKind::Handler(format!("event `{}` has no param `{name}`", event.name))
                })?;
            state.insert(name.clone(), decode::token_to_value(param.value.clone()));
        }
        states.push(ContractValue::Object(state));
    }

    if only_latest {
        states
            .pop()
            .ok_or_else(|| ErrorKind::Handler(format!("no `{}` events emitted", event.name)))
    } else {
        Ok(ContractValue::Array(states))
    }
}

/// Counts matching events up to the pinned block.
pub async fn event_count(
    provider: &dyn DiscoveryProvider,
    address: Address,
    signature: &str,
) -> Result<ContractValue, ErrorKind> {
    let event = parse_event(signature)?;
    let logs = fetch_sorted(provider, address, event.signature()).await?;
    Ok(ContractValue::Number(logs.len().into()))
}

/// Replays `SetValidKeyset`/`InvalidateKeyset` into the set of currently
/// valid keyset hashes.
pub async fn arbitrum_dac(
    provider: &dyn DiscoveryProvider,
    address: Address,
) -> Result<ContractValue, ErrorKind> {
    let mut logs = Vec::new();
    for topic in [*SET_VALID_KEYSET_TOPIC, *INVALIDATE_KEYSET_TOPIC] {
        let filter = Filter::new().address(address).topic0(topic);
        logs.extend(
            provider
                .get_logs(&filter)
                .await
                .map_err(|err| ErrorKind::Rpc(err.to_string()))?,
        );
    }
    logs.sort_by_key(log_position);

    let mut keysets: BTreeSet<H256> = BTreeSet::new();
    for log in &logs {
        let (Some(topic0), Some(keyset)) = (log.topics.first(), log.topics.get(1)) else {
            continue;
        };
        if *topic0 == *SET_VALID_KEYSET_TOPIC {
            keysets.insert(*keyset);
        } else {
            keysets.remove(keyset);
        }
    }

    Ok(ContractValue::Array(
        keysets
            .into_iter()
            .map(|keyset| ContractValue::Bytes(keyset.as_bytes().to_vec().into()))
            .collect(),
    ))
}

fn parse_event(signature: &str) -> Result<Event, ErrorKind> {
    let signature = if signature.trim_start().starts_with("event") {
        signature.to_string()
    } else {
        format!("event {signature}")
    };
    HumanReadableParser::parse_event(&signature)
        .map_err(|err| ErrorKind::Handler(format!("invalid event signature: {err}")))
}

async fn fetch_sorted(
    provider: &dyn DiscoveryProvider,
    address: Address,
    topic0: H256,
) -> Result<Vec<Log>, ErrorKind> {
    let filter = Filter::new().address(address).topic0(topic0);
    let mut logs = provider
        .get_logs(&filter)
        .await
        .map_err(|err| ErrorKind::Rpc(err.to_string()))?;
    logs.sort_by_key(log_position);
    Ok(logs)
}
