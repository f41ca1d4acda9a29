//! Handler execution.
//!
//! Every configured field is an independent extractor. Fields run
//! concurrently, failures stay per-field, and anything address-shaped in a
//! produced value is harvested as a relative unless the field opts out via
//! `ignoreRelatives`.

use crate::{edit, errors::ErrorKind};
use ethers_core::abi::Abi;
use ethers_core::types::Address;
use futures::future::join_all;
use scout_common::{ContractSources, ContractValue, DiscoveryProvider};
use scout_config::{HandlerDefinition, StructureContract};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub mod access_control;
pub mod array;
pub mod call;
pub mod constructor;
pub mod decode;
pub mod events;
pub mod storage;

/// The collected result of running every field of one contract.
#[derive(Debug, Default)]
pub struct HandlerOutput {
    pub values: BTreeMap<String, ContractValue>,
    pub errors: BTreeMap<String, ErrorKind>,
    /// Harvested relatives with the template hints their fields attached.
    pub relatives: BTreeMap<Address, BTreeSet<String>>,
    /// `(role, member)` pairs from access-control fields.
    pub role_grants: Vec<(String, Address)>,
}

/// Runs the configured fields of `address` concurrently and collects values,
/// per-field errors and relatives.
pub async fn execute(
    provider: &dyn DiscoveryProvider,
    address: Address,
    abi: Option<&Abi>,
    sources: &ContractSources,
    config: &StructureContract,
) -> HandlerOutput {
    let mut output = HandlerOutput::default();

    let handler_fields: Vec<_> = config
        .fields
        .iter()
        .filter_map(|(name, field)| field.handler.as_ref().map(|handler| (name, field, handler)))
        .collect();

    let results = join_all(handler_fields.iter().map(|&(name, field, handler)| async move {
        let result = run_handler(provider, address, abi, sources, handler).await;
        let result = match (result, &field.edit) {
            (Ok((value, grants)), Some(expr)) => edit::apply(expr, value)
                .map(|value| (value, grants))
                .map_err(ErrorKind::Handler),
            (result, _) => result,
        };
        (name.as_str(), result)
    }))
    .await;

    for (name, result) in results {
        match result {
            Ok((value, grants)) => {
                output.values.insert(name.to_string(), value);
                output.role_grants.extend(grants);
            }
            Err(err) => {
                debug!(target: "scout::handlers", ?address, field = name, %err, "field failed");
                output.errors.insert(name.to_string(), err);
            }
        }
    }

    // copy fields run once every handler field has settled
    for (name, field) in &config.fields {
        let Some(source) = &field.copy else { continue };
        let copied = match output.values.get(source) {
            Some(value) => {
                let value = value.clone();
                match &field.edit {
                    Some(expr) => edit::apply(expr, value).map_err(ErrorKind::Handler),
                    None => Ok(value),
                }
            }
            None if output.errors.contains_key(source) => {
                Err(ErrorKind::Handler(format!("copy source `{source}` failed")))
            }
            None => Err(ErrorKind::Handler(format!("copy source `{source}` does not exist"))),
        };
        match copied {
            Ok(value) => {
                output.values.insert(name.clone(), value);
            }
            Err(err) => {
                output.errors.insert(name.clone(), err);
            }
        }
    }

    for (name, value) in &output.values {
        if config.ignore_relatives.iter().any(|ignored| ignored == name) {
            continue;
        }
        let hint = config.fields.get(name).and_then(|field| field.template.clone());
        for relative in value.addresses() {
            let hints = output.relatives.entry(relative).or_default();
            if let Some(hint) = &hint {
                hints.insert(hint.clone());
            }
        }
    }

    output
}

async fn run_handler(
    provider: &dyn DiscoveryProvider,
    address: Address,
    abi: Option<&Abi>,
    sources: &ContractSources,
    handler: &HandlerDefinition,
) -> Result<(ContractValue, Vec<(String, Address)>), ErrorKind> {
    let plain = |value: Result<ContractValue, ErrorKind>| value.map(|value| (value, Vec::new()));
    match handler {
        HandlerDefinition::Storage { slot, offset, return_type } => plain(
            storage::execute(provider, address, slot, *offset, return_type.as_ref()).await,
        ),
        HandlerDefinition::Call { method, args, return_type } => plain(
            call::execute(provider, address, abi, method, args, return_type.as_ref()).await,
        ),
        HandlerDefinition::Array { method, start_index, length } => plain(
            array::execute(provider, address, abi, method, *start_index, *length).await,
        ),
        HandlerDefinition::AccessControl { role_names, pick_role_members } => {
            access_control::execute(provider, address, role_names, pick_role_members.as_deref())
                .await
        }
        HandlerDefinition::ArbitrumDac {} => plain(events::arbitrum_dac(provider, address).await),
        HandlerDefinition::StateFromEvent { event, return_params, only_latest } => plain(
            events::state_from_event(provider, address, event, return_params, *only_latest).await,
        ),
        HandlerDefinition::EventCount { event } => {
            plain(events::event_count(provider, address, event).await)
        }
        HandlerDefinition::Hardcoded { value } => {
            plain(ContractValue::from_json(value).map_err(ErrorKind::Handler))
        }
        HandlerDefinition::ConstructorArgs { name_args } => {
            plain(constructor::execute(sources, *name_args))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::storage::derive_slot;
    use ethers_core::types::U256;
    use pretty_assertions::assert_eq;
    use scout_common::fixture::FixtureProvider;
    use scout_config::{ReturnType, SlotDefinition, SlotKey, StructureContractField};
    use serde_json::json;

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    fn storage_field(slot: u64, return_type: Option<ReturnType>) -> StructureContractField {
        StructureContractField {
            handler: Some(HandlerDefinition::Storage {
                slot: SlotDefinition::Single(SlotKey(slot.into())),
                offset: None,
                return_type,
            }),
            ..Default::default()
        }
    }

    fn contract_with_fields(
        fields: Vec<(&str, StructureContractField)>,
    ) -> StructureContract {
        StructureContract {
            fields: fields.into_iter().map(|(name, field)| (name.to_string(), field)).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn a_failing_field_leaves_the_others_untouched() {
        let mut provider = FixtureProvider::new(1);
        provider.set_storage(
            addr(1),
            derive_slot(&[U256::from(5)], 0).unwrap(),
            addr(9).into(),
        );

        let config = contract_with_fields(vec![
            ("owner", storage_field(5, Some(ReturnType::Address))),
            (
                "broken",
                StructureContractField {
                    handler: Some(HandlerDefinition::Call {
                        method: "owner".to_string(),
                        args: Vec::new(),
                        return_type: None,
                    }),
                    ..Default::default()
                },
            ),
        ]);

        let output =
            execute(&provider, addr(1), None, &ContractSources::default(), &config).await;
        assert_eq!(output.values["owner"], ContractValue::Address(addr(9)));
        assert_eq!(output.errors["broken"], ErrorKind::MissingAbi);
    }

    #[tokio::test]
    async fn copy_fields_run_after_their_source() {
        let mut provider = FixtureProvider::new(1);
        provider.set_storage(
            addr(1),
            derive_slot(&[U256::from(5)], 0).unwrap(),
            addr(9).into(),
        );

        let config = contract_with_fields(vec![
            ("owner", storage_field(5, Some(ReturnType::Address))),
            (
                "admin",
                StructureContractField { copy: Some("owner".to_string()), ..Default::default() },
            ),
            (
                "dangling",
                StructureContractField { copy: Some("nothing".to_string()), ..Default::default() },
            ),
        ]);

        let output =
            execute(&provider, addr(1), None, &ContractSources::default(), &config).await;
        assert_eq!(output.values["admin"], ContractValue::Address(addr(9)));
        assert!(matches!(output.errors["dangling"], ErrorKind::Handler(_)));
    }

    #[tokio::test]
    async fn relatives_honor_ignore_and_carry_hints() {
        let mut provider = FixtureProvider::new(1);
        provider
            .set_storage(addr(1), derive_slot(&[U256::from(5)], 0).unwrap(), addr(9).into())
            .set_storage(addr(1), derive_slot(&[U256::from(6)], 0).unwrap(), addr(8).into());

        let mut hinted = storage_field(5, Some(ReturnType::Address));
        hinted.template = Some("safe".to_string());
        let config = StructureContract {
            ignore_relatives: vec!["secret".to_string()],
            fields: BTreeMap::from([
                ("vault".to_string(), hinted),
                ("secret".to_string(), storage_field(6, Some(ReturnType::Address))),
            ]),
            ..Default::default()
        };

        let output =
            execute(&provider, addr(1), None, &ContractSources::default(), &config).await;
        assert_eq!(output.values.len(), 2);
        assert_eq!(
            output.relatives,
            BTreeMap::from([(addr(9), BTreeSet::from(["safe".to_string()]))])
        );
    }

    #[tokio::test]
    async fn edits_transform_the_raw_value() {
        let config = contract_with_fields(vec![(
            "second",
            StructureContractField {
                handler: Some(HandlerDefinition::Hardcoded { value: json!(["x", "y"]) }),
                edit: Some(json!(["get", 1])),
                ..Default::default()
            },
        )]);

        let provider = FixtureProvider::new(1);
        let output =
            execute(&provider, addr(1), None, &ContractSources::default(), &config).await;
        assert_eq!(output.values["second"], ContractValue::from("y"));
    }
}
