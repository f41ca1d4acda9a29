//! Reads project configs from disk, resolving `import`s.
//!
//! Imported files are partial configs (overrides, types, shared modules)
//! merged beneath the importing file: the importer wins per key. Imports may
//! themselves import; a cycle is a fatal configuration error.

use crate::{jsonc, ConfigError, StructureConfig, StructureContract};
use ethers_core::types::Address;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Loads and validates the config at `path`.
pub fn read_config(path: &Path) -> Result<StructureConfig, ConfigError> {
    let mut stack = Vec::new();
    let text = fs::read_to_string(path).map_err(|err| ConfigError::io(path, err))?;
    let mut config: StructureConfig =
        jsonc::parse(&text).map_err(|err| ConfigError::from_jsonc(path, err))?;

    push_visited(path, &mut stack)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    for import in config.import.clone() {
        let fragment = read_fragment(&dir.join(&import), &mut stack)?;
        merge_fragment(&mut config, fragment);
    }

    config.validate()?;
    debug!(
        target: "scout::config",
        name = %config.name,
        chain = %config.chain,
        seeds = config.initial_addresses.len(),
        "loaded project config"
    );
    Ok(config)
}

/// The subset of a config an `import` may contribute.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFragment {
    #[serde(default)]
    import: Vec<PathBuf>,
    #[serde(default)]
    overrides: BTreeMap<Address, StructureContract>,
    #[serde(default)]
    shared_modules: Vec<String>,
    #[serde(default)]
    types: BTreeMap<String, serde_json::Value>,
}

fn read_fragment(path: &Path, stack: &mut Vec<PathBuf>) -> Result<ConfigFragment, ConfigError> {
    push_visited(path, stack)?;

    let text = fs::read_to_string(path).map_err(|err| ConfigError::io(path, err))?;
    let mut fragment: ConfigFragment =
        jsonc::parse(&text).map_err(|err| ConfigError::from_jsonc(path, err))?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    for import in std::mem::take(&mut fragment.import) {
        let nested = read_fragment(&dir.join(&import), stack)?;
        // the importing fragment wins over what it imports
        for (address, contract) in nested.overrides {
            fragment.overrides.entry(address).or_insert(contract);
        }
        for (name, ty) in nested.types {
            fragment.types.entry(name).or_insert(ty);
        }
        for module in nested.shared_modules {
            if !fragment.shared_modules.contains(&module) {
                fragment.shared_modules.push(module);
            }
        }
    }

    stack.pop();
    Ok(fragment)
}

fn merge_fragment(config: &mut StructureConfig, fragment: ConfigFragment) {
    for (address, contract) in fragment.overrides {
        config.overrides.entry(address).or_insert(contract);
    }
    for (name, ty) in fragment.types {
        config.types.entry(name).or_insert(ty);
    }
    for module in fragment.shared_modules {
        if !config.shared_modules.contains(&module) {
            config.shared_modules.push(module);
        }
    }
}

fn push_visited(path: &Path, stack: &mut Vec<PathBuf>) -> Result<(), ConfigError> {
    let canonical = path.canonicalize().map_err(|err| ConfigError::io(path, err))?;
    if stack.contains(&canonical) {
        return Err(ConfigError::Cycle(format!(
            "config import cycle through {}",
            canonical.display()
        )))
    }
    stack.push(canonical);
    Ok(())
}
