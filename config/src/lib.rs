//! Project configuration for scout.
//!
//! A discovery project is described by a [`StructureConfig`]: the seed
//! addresses, traversal limits, and per-address [`StructureContract`]
//! overrides declaring which fields to extract and how. Templates carry the
//! same per-contract shape and are merged beneath overrides.
//!
//! Unknown keys are preserved on every record so that configs round-trip.

use ethers_core::types::Address;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf};

mod error;
/// per-field extractor declarations
pub mod handler;
/// JSONC parsing
pub mod jsonc;
/// reading configs from disk, `import` resolution, validation
pub mod reader;
/// template bundle types and loading
pub mod template;

pub use error::ConfigError;
pub use handler::{HandlerDefinition, ReturnType, SlotDefinition, SlotKey};
pub use reader::read_config;
pub use template::{load_templates, Template, TemplateCriteria};

/// Ceiling on discovered entries unless the project raises it.
pub const DEFAULT_MAX_ADDRESSES: usize = 100;

/// The root configuration of one discovery project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureConfig {
    pub name: String,
    pub chain: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub archived: bool,
    pub initial_addresses: Vec<Address>,
    /// Partial configs merged beneath this one, importer winning.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub import: Vec<PathBuf>,
    /// Hard ceiling on discovered entries.
    #[serde(default = "default_max_addresses")]
    pub max_addresses: usize,
    /// Strict BFS depth limit; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<Address, StructureContract>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_modules: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub types: BTreeMap<String, serde_json::Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_max_addresses() -> usize {
    DEFAULT_MAX_ADDRESSES
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            chain: String::new(),
            archived: false,
            initial_addresses: Vec::new(),
            import: Vec::new(),
            max_addresses: DEFAULT_MAX_ADDRESSES,
            max_depth: None,
            overrides: BTreeMap::new(),
            shared_modules: Vec::new(),
            types: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl StructureConfig {
    pub fn override_for(&self, address: Address) -> Option<&StructureContract> {
        self.overrides.get(&address)
    }

    /// Schema checks that must hold before any chain access.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Schema("project name must not be empty".to_string()))
        }
        if self.chain.is_empty() {
            return Err(ConfigError::Schema("chain must not be empty".to_string()))
        }
        if self.max_addresses == 0 {
            return Err(ConfigError::Schema("maxAddresses must be at least 1".to_string()))
        }
        for (address, contract) in &self.overrides {
            contract
                .validate()
                .map_err(|err| ConfigError::Schema(format!("override {address:#x}: {err}")))?;
        }
        Ok(())
    }
}

/// Per-contract configuration: either an override keyed by address or the
/// body of a template.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureContract {
    /// Template this one inherits from; resolved depth-first at load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_act_independently: Option<bool>,
    /// When set, the address is classified but its relatives are not
    /// followed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_discovery: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_type: Option<ManualProxyType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_in_watch_mode: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_methods: Vec<String>,
    /// Field names whose values are not harvested as relatives.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_relatives: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, StructureContractField>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub methods: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub manual_source_paths: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub types: BTreeMap<String, serde_json::Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl StructureContract {
    pub fn ignore_discovery(&self) -> bool {
        self.ignore_discovery.unwrap_or(false)
    }

    /// Layers `self` over `base`: maps merge entry-wise with `self` winning,
    /// lists concatenate deduplicated, scalars fall back to `base`.
    pub fn merged_over(&self, base: &Self) -> Self {
        let mut fields = base.fields.clone();
        fields.extend(self.fields.clone());
        let mut methods = base.methods.clone();
        methods.extend(self.methods.clone());
        let mut manual_source_paths = base.manual_source_paths.clone();
        manual_source_paths.extend(self.manual_source_paths.clone());
        let mut types = base.types.clone();
        types.extend(self.types.clone());
        let mut extra = base.extra.clone();
        extra.extend(self.extra.clone());

        Self {
            extends: None,
            can_act_independently: self.can_act_independently.or(base.can_act_independently),
            ignore_discovery: self.ignore_discovery.or(base.ignore_discovery),
            proxy_type: self.proxy_type.or(base.proxy_type),
            ignore_in_watch_mode: dedup_concat(&base.ignore_in_watch_mode, &self.ignore_in_watch_mode),
            ignore_methods: dedup_concat(&base.ignore_methods, &self.ignore_methods),
            ignore_relatives: dedup_concat(&base.ignore_relatives, &self.ignore_relatives),
            fields,
            methods,
            manual_source_paths,
            types,
            extra,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, field) in &self.fields {
            if field.handler.is_some() && field.copy.is_some() {
                return Err(format!("field `{name}` declares both a handler and a copy"))
            }
        }
        Ok(())
    }
}

/// Declaration of one extractable field.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureContractField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<HandlerDefinition>,
    /// Copies another field's produced value; mutually exclusive with
    /// `handler`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy: Option<String>,
    /// Template hint attached to relatives harvested from this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Post-transform applied to the raw value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Proxy patterns a config can pin, short-circuiting auto-detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManualProxyType {
    #[serde(rename = "EIP1967 proxy")]
    Eip1967,
    #[serde(rename = "EIP1967 beacon")]
    Beacon,
    #[serde(rename = "EIP1822 proxy")]
    Uups,
    #[serde(rename = "gnosis safe")]
    GnosisSafe,
    #[serde(rename = "immutable")]
    Immutable,
}

fn dedup_concat(base: &[String], over: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(base.len() + over.len());
    for entry in base.iter().chain(over) {
        if !out.contains(entry) {
            out.push(entry.clone());
        }
    }
    out
}
