//! Precedence merge of slot fragments
//!
//! Fragments are walked in precedence order. A source only claims a path
//! when its value there is populated, so an empty placeholder in a
//! high-precedence slot never hides data held by a lower one. Claimed
//! objects are resolved key by key across every source that holds a
//! populated object at the same path.
//!
//! ```text
//! edit ─┐
//!       ▼
//! canonical ──► ownership ──► legacy ──► derived
//!   first populated value wins; objects union their keys
//! ```

use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::snapshot::{is_populated, StepSnapshot};
use crate::source::SourceFragment;

/// Combines ordered fragments and an optional edit into one step view
#[derive(Debug, Clone, Copy, Default)]
pub struct PrecedenceMerger;

impl PrecedenceMerger {
    pub fn new() -> Self {
        Self
    }

    /// Merge fragments (highest precedence first) under an optional edit.
    ///
    /// Paths no source claims are absent from the result.
    pub fn merge(&self, fragments: &[SourceFragment], edit: Option<&StepSnapshot>) -> StepSnapshot {
        let sources: Vec<&StepSnapshot> = fragments.iter().map(|f| &f.snapshot).collect();
        merge_objects(&sources, edit)
    }
}

/// Resolve every key of the given object sources
fn merge_objects(sources: &[&Map<String, Value>], edit: Option<&Map<String, Value>>) -> Map<String, Value> {
    let mut seen = HashSet::new();
    let keys: Vec<&String> = edit
        .into_iter()
        .flat_map(|e| e.keys())
        .chain(sources.iter().flat_map(|s| s.keys()))
        .filter(|key| seen.insert(key.as_str()))
        .collect();

    let mut merged = Map::new();
    for key in keys {
        let edit_child = edit.and_then(|e| e.get(key));
        let candidates: Vec<&Value> = sources.iter().filter_map(|s| s.get(key)).collect();
        if let Some(value) = resolve(edit_child, &candidates) {
            merged.insert(key.clone(), value);
        }
    }
    merged
}

/// Resolve one path from an optional edit value and the candidate values
/// of each source, highest precedence first.
fn resolve(edit: Option<&Value>, candidates: &[&Value]) -> Option<Value> {
    match edit {
        // A non-empty edit object is partial; its untouched keys still
        // come from the sources.
        Some(Value::Object(partial)) if !partial.is_empty() => {
            let objects = populated_objects(candidates);
            return Some(Value::Object(merge_objects(&objects, Some(partial))));
        }
        Some(value) => return Some(value.clone()),
        None => {}
    }

    let claimed = candidates.iter().copied().find(|c| is_populated(c))?;
    match claimed {
        Value::Object(_) => {
            let objects = populated_objects(candidates);
            Some(Value::Object(merge_objects(&objects, None)))
        }
        other => Some(other.clone()),
    }
}

fn populated_objects<'a>(candidates: &[&'a Value]) -> Vec<&'a Map<String, Value>> {
    candidates
        .iter()
        .filter(|c| is_populated(c))
        .filter_map(|c| c.as_object())
        .collect()
}
