//! Raw storage reads, including Solidity mapping slot derivation.

use crate::{errors::ErrorKind, handlers::decode};
use ethers_core::{
    types::{Address, H256, U256},
    utils::keccak256,
};
use scout_common::{ContractValue, DiscoveryProvider};
use scout_config::{ReturnType, SlotDefinition};

pub async fn execute(
    provider: &dyn DiscoveryProvider,
    address: Address,
    slot: &SlotDefinition,
    offset: Option<u64>,
    return_type: Option<&ReturnType>,
) -> Result<ContractValue, ErrorKind> {
    let slot = derive_slot(&slot.parts(), offset.unwrap_or(0))?;
    let word = provider
        .get_storage(address, slot)
        .await
        .map_err(|err| ErrorKind::Rpc(err.to_string()))?;
    decode::decode_word(word, return_type)
}

/// Computes the storage slot for `[base, k1, .., kn]`: each mapping key
/// wraps the slot so far as `keccak256(pad32(key) || pad32(slot))`, matching
/// Solidity's nested-mapping layout. `offset` is added to the result.
pub fn derive_slot(parts: &[U256], offset: u64) -> Result<H256, ErrorKind> {
    let Some((base, keys)) = parts.split_first() else {
        return Err(ErrorKind::Handler("empty storage slot".to_string()))
    };

    let mut slot = pad32(*base);
    for key in keys {
        let mut preimage = [0u8; 64];
        preimage[..32].copy_from_slice(pad32(*key).as_bytes());
        preimage[32..].copy_from_slice(slot.as_bytes());
        slot = H256::from(keccak256(preimage));
    }

    if offset > 0 {
        let shifted = U256::from(slot.as_bytes()).overflowing_add(offset.into()).0;
        slot = pad32(shifted);
    }

    Ok(slot)
}

fn pad32(value: U256) -> H256 {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    H256::from(bytes)
}
