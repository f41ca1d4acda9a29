//! Template matching.
//!
//! Templates are reusable contract configurations keyed by source shape. The
//! service indexes shape hashes once at construction and stays immutable for
//! the lifetime of the run.

use ethers_core::types::{Address, H256};
use scout_config::{load_templates, ConfigError, StructureContract, Template};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, warn};

/// Score contributions, in the order they are applied.
const SHAPE_SCORE: u32 = 2;
const ADDRESS_SCORE: u32 = 10;
const CHAIN_SCORE: u32 = 5;
const HINT_SCORE: u32 = 1;

/// Immutable template index for one run.
#[derive(Debug, Default)]
pub struct TemplateService {
    templates: BTreeMap<String, Template>,
    hash_index: HashMap<H256, BTreeSet<String>>,
}

impl TemplateService {
    pub fn new(templates: Vec<Template>) -> Self {
        let mut hash_index: HashMap<H256, BTreeSet<String>> = HashMap::new();
        for template in &templates {
            for shape in &template.shapes {
                hash_index.entry(*shape).or_default().insert(template.id.clone());
            }
        }
        let templates = templates.into_iter().map(|t| (t.id.clone(), t)).collect();
        Self { templates, hash_index }
    }

    /// Loads the bundle at `dir`.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        Ok(Self::new(load_templates(dir)?))
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    /// Picks the best template for a contract, if any.
    ///
    /// Candidates come from the shape index and the accumulated hints; a
    /// criteria mismatch disqualifies, everything else is scored. Ties fall
    /// to the lexicographically smallest id so matching is deterministic.
    pub fn find_matching(
        &self,
        source_hashes: &[H256],
        address: Address,
        chain: &str,
        hints: &BTreeSet<String>,
    ) -> Option<&Template> {
        let mut candidates: BTreeSet<&str> = BTreeSet::new();
        for hash in source_hashes {
            if let Some(ids) = self.hash_index.get(hash) {
                candidates.extend(ids.iter().map(String::as_str));
            }
        }
        for hint in hints {
            if self.templates.contains_key(hint) {
                candidates.insert(hint);
            } else {
                warn!(target: "scout::templates", %hint, "hinted template does not exist");
            }
        }

        let mut best: Option<(u32, &Template)> = None;
        for id in candidates {
            let template = &self.templates[id];
            if let Some(criteria) = &template.criteria {
                if !criteria.matches(address, chain) {
                    continue;
                }
            }

            let mut score = 0;
            score += SHAPE_SCORE
                * template.shapes.iter().filter(|shape| source_hashes.contains(shape)).count()
                    as u32;
            if let Some(criteria) = &template.criteria {
                if !criteria.addresses.is_empty() {
                    score += ADDRESS_SCORE;
                }
                if !criteria.chains.is_empty() {
                    score += CHAIN_SCORE;
                }
            }
            if hints.contains(id) {
                score += HINT_SCORE;
            }

            // strictly-greater keeps the smallest id on ties: candidates
            // iterate in lexicographic order
            if best.map_or(true, |(best_score, _)| score > best_score) {
                best = Some((score, template));
            }
        }

        if let Some((score, template)) = best {
            debug!(target: "scout::templates", id = %template.id, score, "matched template");
        }
        best.map(|(_, template)| template)
    }

    /// Resolves a template's `extends` chain depth-first into one flat
    /// configuration. A cycle is a fatal configuration error.
    pub fn resolve(&self, id: &str) -> Result<StructureContract, ConfigError> {
        let mut visiting = Vec::new();
        self.resolve_inner(id, &mut visiting)
    }

    fn resolve_inner(
        &self,
        id: &str,
        visiting: &mut Vec<String>,
    ) -> Result<StructureContract, ConfigError> {
        if visiting.iter().any(|seen| seen == id) {
            return Err(ConfigError::Cycle(format!(
                "template extends cycle: {} -> {id}",
                visiting.join(" -> ")
            )))
        }

        let template = self
            .get(id)
            .ok_or_else(|| ConfigError::Schema(format!("unknown template `{id}`")))?;

        let Some(parent) = &template.config.extends else { return Ok(template.config.clone()) };

        visiting.push(id.to_string());
        let base = self.resolve_inner(parent, visiting)?;
        visiting.pop();

        Ok(template.config.merged_over(&base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use scout_config::TemplateCriteria;

    fn template(id: &str, shapes: Vec<H256>) -> Template {
        Template { id: id.to_string(), config: StructureContract::default(), shapes, criteria: None }
    }

    fn hash(byte: u8) -> H256 {
        H256::repeat_byte(byte)
    }

    #[test]
    fn shape_hashes_select_candidates() {
        let service = TemplateService::new(vec![
            template("safe", vec![hash(1)]),
            template("vault", vec![hash(2)]),
        ]);

        let matched = service
            .find_matching(&[hash(2)], Address::zero(), "ethereum", &BTreeSet::new())
            .unwrap();
        assert_eq!(matched.id, "vault");

        assert!(service
            .find_matching(&[hash(9)], Address::zero(), "ethereum", &BTreeSet::new())
            .is_none());
    }

    #[test]
    fn criteria_filter_before_scoring() {
        let mut narrowed = template("safe", vec![hash(1)]);
        narrowed.criteria =
            Some(TemplateCriteria { addresses: Vec::new(), chains: vec!["optimism".to_string()] });
        let service = TemplateService::new(vec![narrowed]);

        assert!(service
            .find_matching(&[hash(1)], Address::zero(), "ethereum", &BTreeSet::new())
            .is_none());
        assert!(service
            .find_matching(&[hash(1)], Address::zero(), "optimism", &BTreeSet::new())
            .is_some());
    }

    #[test]
    fn address_criterion_outscores_extra_shapes() {
        let seed = Address::from([0xaa; 20]);
        let mut pinned = template("pinned", vec![hash(1)]);
        pinned.criteria =
            Some(TemplateCriteria { addresses: vec![seed], chains: Vec::new() });
        let broad = template("broad", vec![hash(1), hash(2), hash(3)]);
        let service = TemplateService::new(vec![broad, pinned]);

        let matched = service
            .find_matching(&[hash(1), hash(2), hash(3)], seed, "ethereum", &BTreeSet::new())
            .unwrap();
        // 2 + 10 for the pinned template vs 6 for three shape matches
        assert_eq!(matched.id, "pinned");
    }

    #[test]
    fn equal_scores_take_the_smallest_id() {
        let service = TemplateService::new(vec![
            template("zebra", vec![hash(1)]),
            template("aardvark", vec![hash(1)]),
        ]);
        let matched = service
            .find_matching(&[hash(1)], Address::zero(), "ethereum", &BTreeSet::new())
            .unwrap();
        assert_eq!(matched.id, "aardvark");
    }

    #[test]
    fn hints_add_candidates_and_break_toward_hinted() {
        let service = TemplateService::new(vec![template("manual", Vec::new())]);
        let hints = BTreeSet::from(["manual".to_string()]);
        let matched =
            service.find_matching(&[], Address::zero(), "ethereum", &hints).unwrap();
        assert_eq!(matched.id, "manual");

        // a hint naming nothing is ignored
        let hints = BTreeSet::from(["ghost".to_string()]);
        assert!(service.find_matching(&[], Address::zero(), "ethereum", &hints).is_none());
    }

    #[test]
    fn extends_chains_resolve_depth_first() {
        let mut child = template("child", Vec::new());
        child.config.extends = Some("parent".to_string());
        child.config.ignore_relatives = vec!["b".to_string()];
        let mut parent = template("parent", Vec::new());
        parent.config.ignore_relatives = vec!["a".to_string()];
        parent.config.ignore_discovery = Some(true);

        let service = TemplateService::new(vec![child, parent]);
        let resolved = service.resolve("child").unwrap();
        assert!(resolved.ignore_discovery());
        assert_eq!(resolved.ignore_relatives, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn extends_cycles_are_fatal() {
        let mut a = template("a", Vec::new());
        a.config.extends = Some("b".to_string());
        let mut b = template("b", Vec::new());
        b.config.extends = Some("a".to_string());

        let service = TemplateService::new(vec![a, b]);
        assert!(matches!(service.resolve("a"), Err(ConfigError::Cycle(_))));
    }
}
