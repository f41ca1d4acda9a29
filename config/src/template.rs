//! Template bundles: reusable contract configurations matched by source
//! shape.
//!
//! On disk a bundle is a directory tree with one directory per template id
//! (nested ids use `/`). Each template directory holds a `template.jsonc`
//! with the [`StructureContract`] body, an optional `shapes.json` listing the
//! source hashes the template recognizes, and an optional `criteria.json`
//! narrowing it to specific addresses or chains.

use crate::{jsonc, ConfigError, StructureContract};
use ethers_core::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

pub const TEMPLATE_FILE: &str = "template.jsonc";
pub const SHAPES_FILE: &str = "shapes.json";
pub const CRITERIA_FILE: &str = "criteria.json";

/// A loaded template.
#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    pub id: String,
    pub config: StructureContract,
    /// Source hashes of contracts this template applies to.
    pub shapes: Vec<H256>,
    pub criteria: Option<TemplateCriteria>,
}

/// Narrows a template to specific addresses and/or chains.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateCriteria {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<Address>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chains: Vec<String>,
}

impl TemplateCriteria {
    /// Whether a contract at `address` on `chain` passes this filter.
    pub fn matches(&self, address: Address, chain: &str) -> bool {
        if !self.addresses.is_empty() && !self.addresses.contains(&address) {
            return false;
        }
        if !self.chains.is_empty() && !self.chains.iter().any(|c| c == chain) {
            return false;
        }
        true
    }
}

/// Reads every template under `root`, ordered by id.
pub fn load_templates(root: &Path) -> Result<Vec<Template>, ConfigError> {
    let mut templates = Vec::new();

    if !root.exists() {
        return Ok(templates)
    }

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|err| ConfigError::Schema(err.to_string()))?;
        if entry.file_type().is_dir() || entry.file_name() != TEMPLATE_FILE {
            continue;
        }

        let dir = entry.path().parent().unwrap_or(root);
        let id = dir
            .strip_prefix(root)
            .map_err(|err| ConfigError::Schema(err.to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if id.is_empty() {
            return Err(ConfigError::Schema(format!(
                "{TEMPLATE_FILE} must live in a template directory, not the bundle root"
            )))
        }

        let config: StructureContract = read_jsonc(entry.path())?;
        config
            .validate()
            .map_err(|err| ConfigError::Schema(format!("template `{id}`: {err}")))?;

        let shapes_path = dir.join(SHAPES_FILE);
        let shapes: Vec<H256> =
            if shapes_path.exists() { read_jsonc(&shapes_path)? } else { Vec::new() };

        let criteria_path = dir.join(CRITERIA_FILE);
        let criteria: Option<TemplateCriteria> =
            if criteria_path.exists() { Some(read_jsonc(&criteria_path)?) } else { None };

        debug!(target: "scout::templates", %id, shapes = shapes.len(), "loaded template");
        templates.push(Template { id, config, shapes, criteria });
    }

    templates.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(templates)
}

fn read_jsonc<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|err| ConfigError::io(path, err))?;
    jsonc::parse(&text).map_err(|err| ConfigError::from_jsonc(path, err))
}
