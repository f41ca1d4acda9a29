//! Per-address analysis.
//!
//! One `analyze` call classifies an address, detects its proxy layout,
//! fetches verified source, picks a template, runs the configured handlers
//! and computes the relatives the engine should follow next.

use crate::{
    analysis::{Analysis, ContractAnalysis, EoaAnalysis},
    errors::{DiscoveryError, ErrorKind},
    handlers,
    proxy::ProxyDetector,
    template::TemplateService,
};
use ethers_core::types::Address;
use scout_common::{ContractSources, DiscoveryProvider, SourceCodeService};
use scout_config::{StructureConfig, StructureContract};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tracing::{debug, warn};

pub struct AddressAnalyzer {
    sources: Arc<dyn SourceCodeService>,
    templates: Arc<TemplateService>,
    proxy: ProxyDetector,
}

impl AddressAnalyzer {
    pub fn new(sources: Arc<dyn SourceCodeService>, templates: Arc<TemplateService>) -> Self {
        Self { sources, templates, proxy: ProxyDetector::new() }
    }

    /// Analyzes one address at the provider's pinned block.
    ///
    /// Per-field problems are recorded in the analysis; only an unusable
    /// provider or broken configuration aborts the run.
    pub async fn analyze(
        &self,
        provider: &dyn DiscoveryProvider,
        address: Address,
        hints: &BTreeSet<String>,
        config: &StructureConfig,
    ) -> Result<Analysis, DiscoveryError> {
        let code = provider
            .get_code(address)
            .await
            .map_err(|err| DiscoveryError::Provider(err.to_string()))?;
        if code.is_empty() {
            debug!(target: "scout::analyzer", ?address, "EOA");
            return Ok(Analysis::Eoa(EoaAnalysis { address }))
        }

        let override_ = config.override_for(address);
        let mut errors = BTreeMap::new();

        let detection = match self
            .proxy
            .detect(provider, address, override_.and_then(|o| o.proxy_type))
            .await
        {
            Ok(detection) => detection,
            Err(err) => {
                warn!(target: "scout::analyzer", ?address, %err, "proxy detection failed");
                errors.insert("$proxy".to_string(), ErrorKind::Rpc(err.to_string()));
                Default::default()
            }
        };

        let sources = match self.sources.fetch(address, &detection.implementations).await {
            Ok(sources) => sources,
            Err(err) => {
                warn!(target: "scout::analyzer", ?address, %err, "source fetch failed");
                ContractSources::default()
            }
        };
        let source_hashes = sources.hashes();

        let matched =
            self.templates.find_matching(&source_hashes, address, &config.chain, hints);
        let template_id = matched.map(|template| template.id.clone());
        let effective = self.effective_config(matched.map(|t| t.id.as_str()), override_)?;

        let mut analysis = ContractAnalysis {
            address,
            name: sources.name().map(str::to_string),
            proxy_type: detection.proxy_type,
            implementations: detection.implementations.clone(),
            values: detection.values.clone(),
            errors,
            relatives: BTreeMap::new(),
            ignore_in_watch_mode: effective.ignore_in_watch_mode.clone(),
            can_act_independently: effective.can_act_independently,
            template_id,
            source_hashes,
            role_grants: Vec::new(),
        };

        if effective.ignore_discovery() {
            // classified, but deliberately a dead end
            debug!(target: "scout::analyzer", ?address, "discovery ignored");
            return Ok(Analysis::Contract(Box::new(analysis)))
        }

        let abi = sources.abi();
        let output =
            handlers::execute(provider, address, abi.as_ref(), &sources, &effective).await;
        analysis.values.extend(output.values);
        analysis.errors.extend(output.errors);
        analysis.role_grants = output.role_grants;

        let mut relatives = output.relatives;
        for relative in detection.relatives.iter().chain(&detection.implementations) {
            relatives.entry(*relative).or_default();
        }
        relatives.remove(&address);
        relatives.remove(&Address::zero());
        analysis.relatives = relatives;

        Ok(Analysis::Contract(Box::new(analysis)))
    }

    /// Merges the matched template, a possible `extends` on the override,
    /// and the override itself, the override winning per key.
    fn effective_config(
        &self,
        matched: Option<&str>,
        override_: Option<&StructureContract>,
    ) -> Result<StructureContract, DiscoveryError> {
        let mut base = match matched {
            Some(id) => self.templates.resolve(id)?,
            None => StructureContract::default(),
        };

        let Some(override_) = override_ else { return Ok(base) };
        if let Some(parent) = &override_.extends {
            base = self.templates.resolve(parent)?.merged_over(&base);
        }
        Ok(override_.merged_over(&base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::storage::derive_slot;
    use ethers_core::types::U256;
    use pretty_assertions::assert_eq;
    use scout_common::fixture::{FixtureProvider, FixtureSourceService};
    use scout_common::ContractValue;
    use scout_config::{
        HandlerDefinition, ReturnType, SlotDefinition, SlotKey, StructureContractField,
    };

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    fn analyzer() -> AddressAnalyzer {
        AddressAnalyzer::new(
            Arc::new(FixtureSourceService::default()),
            Arc::new(TemplateService::default()),
        )
    }

    fn config_with_override(address: Address, contract: StructureContract) -> StructureConfig {
        StructureConfig {
            name: "test".to_string(),
            chain: "ethereum".to_string(),
            overrides: BTreeMap::from([(address, contract)]),
            ..Default::default()
        }
    }

    fn owner_field(slot: u64) -> StructureContract {
        StructureContract {
            fields: BTreeMap::from([(
                "owner".to_string(),
                StructureContractField {
                    handler: Some(HandlerDefinition::Storage {
                        slot: SlotDefinition::Single(SlotKey(slot.into())),
                        offset: None,
                        return_type: Some(ReturnType::Address),
                    }),
                    ..Default::default()
                },
            )]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn codeless_addresses_are_eoas() {
        let provider = FixtureProvider::new(1);
        let config = config_with_override(addr(1), StructureContract::default());
        let analysis = analyzer()
            .analyze(&provider, addr(1), &BTreeSet::new(), &config)
            .await
            .unwrap();
        assert!(matches!(analysis, Analysis::Eoa(_)));
    }

    #[tokio::test]
    async fn handler_values_and_relatives_flow_through() {
        let mut provider = FixtureProvider::new(1);
        provider.deploy(addr(1)).set_storage(
            addr(1),
            derive_slot(&[U256::from(5)], 0).unwrap(),
            addr(9).into(),
        );

        let config = config_with_override(addr(1), owner_field(5));
        let analysis = analyzer()
            .analyze(&provider, addr(1), &BTreeSet::new(), &config)
            .await
            .unwrap();

        let contract = analysis.as_contract().unwrap();
        assert_eq!(contract.values["owner"], ContractValue::Address(addr(9)));
        assert!(contract.relatives.contains_key(&addr(9)));
    }

    #[tokio::test]
    async fn ignore_discovery_is_a_dead_end() {
        let mut provider = FixtureProvider::new(1);
        provider.deploy(addr(1)).set_storage(
            addr(1),
            derive_slot(&[U256::from(5)], 0).unwrap(),
            addr(9).into(),
        );

        let mut contract = owner_field(5);
        contract.ignore_discovery = Some(true);
        let config = config_with_override(addr(1), contract);
        let analysis = analyzer()
            .analyze(&provider, addr(1), &BTreeSet::new(), &config)
            .await
            .unwrap();

        let contract = analysis.as_contract().unwrap();
        assert!(contract.values.is_empty());
        assert!(contract.relatives.is_empty());
    }

    #[tokio::test]
    async fn self_references_are_not_relatives() {
        let mut provider = FixtureProvider::new(1);
        provider.deploy(addr(1)).set_storage(
            addr(1),
            derive_slot(&[U256::from(5)], 0).unwrap(),
            addr(1).into(),
        );

        let config = config_with_override(addr(1), owner_field(5));
        let analysis = analyzer()
            .analyze(&provider, addr(1), &BTreeSet::new(), &config)
            .await
            .unwrap();
        assert!(analysis.as_contract().unwrap().relatives.is_empty());
    }
}
