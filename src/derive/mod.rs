//! Cross-step derivation
//!
//! Fills gaps in one step from data already present in sibling steps.
//! Rules run in declared order against the live views, so a later rule
//! can build on an earlier one. A rule only fires while its target is
//! unpopulated and was not explicitly cleared; derivation never overwrites.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::config::{CandidateSource, DerivationRule, MatchStrategy};
use crate::normalize::{normalize_id, IdToken, KeyNormalizer};
use crate::snapshot::{is_populated, FieldPath, StepSnapshot};

/// Key paths stored as an explicit null, per step
pub type ClearedPaths = BTreeMap<u32, Vec<Vec<String>>>;

/// One value filled in by derivation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedValue {
    /// Step that received the value
    pub step: u32,
    pub path: FieldPath,
    /// Step the value was read from
    pub source_step: u32,
}

/// Applies declared derivation rules to hydrated views
pub struct DerivationEngine {
    rules: Vec<DerivationRule>,
}

impl DerivationEngine {
    pub fn new(rules: Vec<DerivationRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[DerivationRule] {
        &self.rules
    }

    /// Fill unpopulated rule targets in place and report what was filled,
    /// in rule order
    pub fn derive(
        &self,
        views: &mut BTreeMap<u32, StepSnapshot>,
        cleared: &ClearedPaths,
        normalizer: &KeyNormalizer,
    ) -> Vec<DerivedValue> {
        let mut derived = Vec::new();

        for rule in &self.rules {
            let populated = views
                .get(&rule.target_step)
                .and_then(|view| rule.target_path.get(view))
                .is_some_and(is_populated);
            if populated || is_cleared(cleared, rule.target_step, &rule.target_path) {
                continue;
            }

            let found = rule.candidates.iter().find_map(|candidate| {
                evaluate(candidate, rule.target_step, views, normalizer)
                    .map(|value| (candidate.step, value))
            });
            let Some((source_step, value)) = found else {
                continue;
            };

            let view = views.entry(rule.target_step).or_default();
            if rule.target_path.set(view, value) {
                tracing::debug!(
                    step = rule.target_step,
                    source_step,
                    path = %rule.target_path,
                    "Derived value from sibling step"
                );
                derived.push(DerivedValue {
                    step: rule.target_step,
                    path: rule.target_path.clone(),
                    source_step,
                });
            }
        }

        derived
    }
}

/// True when the target, or one of its parents, is stored as null
fn is_cleared(cleared: &ClearedPaths, step: u32, target: &FieldPath) -> bool {
    let (Some(paths), Some(keys)) = (cleared.get(&step), target.keys()) else {
        return false;
    };
    paths.iter().any(|path| {
        path.len() <= keys.len() && path.iter().zip(&keys).all(|(a, b)| a == b)
    })
}

/// Value a candidate yields, if populated
fn evaluate(
    candidate: &CandidateSource,
    target_step: u32,
    views: &BTreeMap<u32, StepSnapshot>,
    normalizer: &KeyNormalizer,
) -> Option<Value> {
    let source = views
        .get(&candidate.step)
        .and_then(|view| candidate.path.get(view))
        .filter(|value| is_populated(value))?;

    let value = match &candidate.strategy {
        MatchStrategy::StableId => source.clone(),
        MatchStrategy::NormalizedLabel {
            anchor_step,
            anchor_path,
            id_key,
            label_key,
        } => {
            let anchors = views
                .get(&anchor_step.unwrap_or(target_step))
                .and_then(|view| anchor_path.get(view))?;
            rekey_by_label(source, anchors, id_key, label_key, normalizer)?
        }
    };

    is_populated(&value).then_some(value)
}

/// Re-key a label-keyed map onto anchor entries.
///
/// Each anchor entry is matched by its id first, then by normalized
/// label. Output keys are the anchor id, or the normalized label for
/// entries without one.
fn rekey_by_label(
    source: &Value,
    anchors: &Value,
    id_key: &str,
    label_key: &str,
    normalizer: &KeyNormalizer,
) -> Option<Value> {
    let source = source.as_object()?;

    let mut by_label: HashMap<String, &Value> = HashMap::new();
    for (key, value) in source {
        let label = normalizer.normalize_label(key);
        if !label.is_empty() {
            by_label.entry(label).or_insert(value);
        }
    }

    let entries: Vec<&Value> = match anchors {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        _ => return None,
    };

    let mut rekeyed = Map::new();
    for entry in entries {
        let Some(fields) = entry.as_object() else {
            continue;
        };

        let id = match fields.get(id_key).map(normalize_id) {
            Some(IdToken::Present(id)) => Some(id),
            _ => None,
        };
        let label = fields
            .get(label_key)
            .and_then(Value::as_str)
            .map(|raw| normalizer.normalize_label(raw))
            .filter(|label| !label.is_empty());

        let matched = id
            .as_deref()
            .and_then(|id| source.get(id))
            .or_else(|| label.as_deref().and_then(|label| by_label.get(label).copied()))
            .filter(|value| is_populated(value));
        let (Some(value), Some(key)) = (matched, id.or(label)) else {
            continue;
        };
        rekeyed.insert(key, value.clone());
    }

    Some(Value::Object(rekeyed))
}
