//! End-to-end discovery runs over fixture providers.

use ethers_core::types::{Address, H256, U256};
use pretty_assertions::assert_eq;
use scout::{
    handlers::storage::derive_slot, output, AddressAnalyzer, DiscoveryEngine, DiscoveryOutcome,
    TemplateService,
};
use scout_common::fixture::{FixtureProvider, FixtureSourceService};
use scout_common::ContractValue;
use scout_config::{
    HandlerDefinition, ReturnType, SlotDefinition, SlotKey, StructureConfig, StructureContract,
    StructureContractField,
};
use serde_json::json;
use std::sync::Arc;

fn addr(byte: u8) -> Address {
    Address::from([byte; 20])
}

fn base_config(seeds: Vec<Address>) -> StructureConfig {
    StructureConfig {
        name: "project".to_string(),
        chain: "ethereum".to_string(),
        initial_addresses: seeds,
        ..Default::default()
    }
}

fn storage_field(slot: u64, return_type: ReturnType) -> StructureContractField {
    StructureContractField {
        handler: Some(HandlerDefinition::Storage {
            slot: SlotDefinition::Single(SlotKey(slot.into())),
            offset: None,
            return_type: Some(return_type),
        }),
        ..Default::default()
    }
}

fn fields(entries: Vec<(&str, StructureContractField)>) -> StructureContract {
    StructureContract {
        fields: entries.into_iter().map(|(name, field)| (name.to_string(), field)).collect(),
        ..Default::default()
    }
}

async fn discover(
    provider: &FixtureProvider,
    config: &StructureConfig,
) -> DiscoveryOutcome {
    discover_with(provider, config, FixtureSourceService::default(), TemplateService::default())
        .await
}

async fn discover_with(
    provider: &FixtureProvider,
    config: &StructureConfig,
    sources: FixtureSourceService,
    templates: TemplateService,
) -> DiscoveryOutcome {
    let engine =
        DiscoveryEngine::new(AddressAnalyzer::new(Arc::new(sources), Arc::new(templates)));
    engine.discover(provider, config).await.unwrap()
}

#[tokio::test]
async fn an_eoa_seed_yields_a_single_eoa_entry() {
    let provider = FixtureProvider::new(1);
    let config = base_config(vec![addr(0xaa)]);

    let outcome = discover(&provider, &config).await;
    let artifact = output::materialize(&config, 1, &outcome.analyses);
    let serialized = serde_json::to_value(&artifact).unwrap();

    assert_eq!(
        serialized["entries"],
        json!([{
            "type": "EOA",
            "address": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        }])
    );
}

#[tokio::test]
async fn a_storage_field_surfaces_its_value_and_relative() {
    let contract = addr(0xcc);
    let owner = addr(0xbb);
    let mut provider = FixtureProvider::new(1);
    provider
        .deploy(contract)
        .set_storage(contract, derive_slot(&[U256::from(5)], 0).unwrap(), owner.into());

    let mut config = base_config(vec![contract]);
    config
        .overrides
        .insert(contract, fields(vec![("owner", storage_field(5, ReturnType::Address))]));

    let outcome = discover(&provider, &config).await;
    let artifact = output::materialize(&config, 1, &outcome.analyses);
    let serialized = serde_json::to_value(&artifact).unwrap();

    // the contract entry carries the decoded owner
    assert_eq!(
        serialized["entries"][1]["values"]["owner"],
        json!("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb")
    );
    // and the owner itself was discovered as an EOA
    assert_eq!(serialized["entries"][0]["type"], json!("EOA"));
    assert_eq!(serialized["entries"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn ignore_relatives_suppresses_the_followup() {
    let contract = addr(0xcc);
    let mut provider = FixtureProvider::new(1);
    provider
        .deploy(contract)
        .set_storage(contract, derive_slot(&[U256::from(5)], 0).unwrap(), addr(0xbb).into());

    let mut config = base_config(vec![contract]);
    let mut override_ = fields(vec![("owner", storage_field(5, ReturnType::Address))]);
    override_.ignore_relatives = vec!["owner".to_string()];
    config.overrides.insert(contract, override_);

    let outcome = discover(&provider, &config).await;
    assert_eq!(outcome.analyses.len(), 1);
}

#[tokio::test]
async fn proxies_pull_in_their_implementation() {
    let proxy = addr(0x10);
    let implementation = addr(0x20);
    let implementation_slot: H256 =
        "0x360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc".parse().unwrap();

    let mut provider = FixtureProvider::new(1);
    provider
        .deploy(proxy)
        .deploy(implementation)
        .set_storage(proxy, implementation_slot, implementation.into());

    let config = base_config(vec![proxy]);
    let outcome = discover(&provider, &config).await;
    let artifact = output::materialize(&config, 1, &outcome.analyses);
    let serialized = serde_json::to_value(&artifact).unwrap();

    let entries = serialized["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["proxyType"], json!("EIP1967 proxy"));
    assert_eq!(
        entries[0]["implementations"],
        json!(["0x2020202020202020202020202020202020202020"])
    );
    assert_eq!(
        entries[0]["values"]["$implementation"],
        json!("0x2020202020202020202020202020202020202020")
    );
    // the implementation was analyzed as its own contract entry
    assert_eq!(entries[1]["type"], json!("Contract"));
}

#[tokio::test]
async fn templates_match_by_source_shape() {
    let safe = addr(0x30);
    let source = "contract GnosisSafe { uint256 public threshold; }";

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("safe");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("template.jsonc"),
        r#"{
            // every safe exposes its signing threshold
            "fields": {
                "threshold": { "handler": { "type": "storage", "slot": 4, "returnType": "uint256" } }
            }
        }"#,
    )
    .unwrap();
    std::fs::write(
        dir.join("shapes.json"),
        format!("[\"{:?}\"]", scout_common::source::source_hash(source)),
    )
    .unwrap();

    let mut provider = FixtureProvider::new(1);
    provider.deploy(safe).set_storage(
        safe,
        derive_slot(&[U256::from(4)], 0).unwrap(),
        H256::from_low_u64_be(3),
    );

    let mut sources = FixtureSourceService::default();
    sources.insert(safe, "GnosisSafe", source, None);

    let config = base_config(vec![safe]);
    let templates = TemplateService::load(tmp.path()).unwrap();
    let outcome = discover_with(&provider, &config, sources, templates).await;

    let contract = outcome.analyses[0].as_contract().unwrap();
    assert_eq!(contract.template_id.as_deref(), Some("safe"));
    assert_eq!(contract.values["threshold"], ContractValue::Number(3u64.into()));
    assert_eq!(contract.name.as_deref(), Some("GnosisSafe"));
}

#[tokio::test]
async fn the_address_cap_truncates_but_completes() {
    let hub = addr(0x01);
    let spokes: Vec<String> =
        (0x10..0x15u8).map(|b| format!("{:#x}", addr(b))).collect();

    let mut provider = FixtureProvider::new(1);
    provider.deploy(hub);

    let mut config = base_config(vec![hub]);
    config.max_addresses = 3;
    config.overrides.insert(
        hub,
        fields(vec![(
            "spokes",
            StructureContractField {
                handler: Some(HandlerDefinition::Hardcoded { value: json!(spokes) }),
                ..Default::default()
            },
        )]),
    );

    let outcome = discover(&provider, &config).await;
    assert_eq!(outcome.analyses.len(), 3);
    assert_eq!(outcome.dropped.len(), 3);
}

#[tokio::test]
async fn mutual_references_terminate_with_one_entry_each() {
    let a = addr(0x0a);
    let b = addr(0x0b);
    let mut provider = FixtureProvider::new(1);
    let slot = derive_slot(&[U256::zero()], 0).unwrap();
    provider.deploy(a).deploy(b).set_storage(a, slot, b.into()).set_storage(b, slot, a.into());

    let mut config = base_config(vec![a]);
    for address in [a, b] {
        config
            .overrides
            .insert(address, fields(vec![("peer", storage_field(0, ReturnType::Address))]));
    }

    let outcome = discover(&provider, &config).await;
    let addresses: Vec<_> =
        outcome.analyses.iter().map(|analysis| analysis.address()).collect();
    assert_eq!(addresses, vec![a, b]);
}

#[tokio::test]
async fn identical_runs_produce_identical_bytes() {
    let proxy = addr(0x10);
    let implementation = addr(0x20);
    let implementation_slot: H256 =
        "0x360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc".parse().unwrap();

    let mut provider = FixtureProvider::new(42);
    provider
        .deploy(proxy)
        .deploy(implementation)
        .set_storage(proxy, implementation_slot, implementation.into());
    let config = base_config(vec![proxy]);

    let first = discover(&provider, &config).await;
    let second = discover(&provider, &config).await;

    let first = output::materialize(&config, 42, &first.analyses).to_pretty_json().unwrap();
    let second = output::materialize(&config, 42, &second.analyses).to_pretty_json().unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn every_followed_relative_appears_as_an_entry() {
    let hub = addr(0x01);
    let mut provider = FixtureProvider::new(1);
    provider.deploy(hub);

    let mut config = base_config(vec![hub]);
    config.overrides.insert(
        hub,
        fields(vec![(
            "refs",
            StructureContractField {
                handler: Some(HandlerDefinition::Hardcoded {
                    value: json!([format!("{:#x}", addr(0x42)), format!("{:#x}", addr(0x43))]),
                }),
                ..Default::default()
            },
        )]),
    );

    let outcome = discover(&provider, &config).await;
    let discovered: Vec<_> =
        outcome.analyses.iter().map(|analysis| analysis.address()).collect();
    for analysis in &outcome.analyses {
        let Some(contract) = analysis.as_contract() else { continue };
        for relative in contract.relatives.keys() {
            assert!(
                discovered.contains(relative) || outcome.dropped.contains(relative),
                "relative {relative:#x} neither discovered nor accounted for"
            );
        }
    }
    assert_eq!(discovered.len(), 3);
}
