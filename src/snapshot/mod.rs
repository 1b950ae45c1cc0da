//! Step snapshot trees
//!
//! A step snapshot is a JSON object tree holding one wizard step's data.
//! This module carries the helpers every pipeline stage shares: the
//! populated check, concrete-path access and leaf flattening.

pub mod merge;
pub mod path;

pub use merge::deep_merge;
pub use path::{FieldPath, Segment};

use serde_json::{Map, Value};

/// One wizard step's data
pub type StepSnapshot = Map<String, Value>;

/// Whether a value counts as populated for precedence purposes.
///
/// Null, blank strings, empty arrays and objects without a populated child
/// are all unpopulated.
pub fn is_populated(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => map.values().any(is_populated),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Value at a key sequence
pub fn get_at<'a, S: AsRef<str>>(root: &'a StepSnapshot, keys: &[S]) -> Option<&'a Value> {
    let (first, rest) = keys.split_first()?;
    let mut current = root.get(first.as_ref())?;
    for key in rest {
        current = current.as_object()?.get(key.as_ref())?;
    }
    Some(current)
}

/// Set the value at a key sequence, creating or replacing intermediate
/// objects as needed. Returns `false` for an empty key sequence.
pub fn set_at<S: AsRef<str>>(root: &mut StepSnapshot, keys: &[S], value: Value) -> bool {
    let Some((last, parents)) = keys.split_last() else {
        return false;
    };

    let mut current = root;
    for key in parents {
        let entry = current
            .entry(key.as_ref().to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return false;
        };
        current = next;
    }

    current.insert(last.as_ref().to_string(), value);
    true
}

/// Flatten a snapshot into its leaf paths.
///
/// Non-empty objects are descended into; everything else (scalars, arrays,
/// null, empty objects) is a leaf.
pub fn leaf_paths(root: &StepSnapshot) -> Vec<(Vec<String>, &Value)> {
    let mut out = Vec::new();
    let mut prefix = Vec::new();
    collect_leaves(root, &mut prefix, &mut out);
    out
}

fn collect_leaves<'a>(
    map: &'a StepSnapshot,
    prefix: &mut Vec<String>,
    out: &mut Vec<(Vec<String>, &'a Value)>,
) {
    for (key, value) in map {
        prefix.push(key.clone());
        match value {
            Value::Object(child) if !child.is_empty() => collect_leaves(child, prefix, out),
            _ => out.push((prefix.clone(), value)),
        }
        prefix.pop();
    }
}

/// Drop empty objects and arrays left behind after pruning
pub fn compact(map: &mut StepSnapshot) {
    map.retain(|_, value| compact_value(value));
}

fn compact_value(value: &mut Value) -> bool {
    match value {
        Value::Object(child) => {
            compact(child);
            !child.is_empty()
        }
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_populated() {
        assert!(!is_populated(&json!(null)));
        assert!(!is_populated(&json!("")));
        assert!(!is_populated(&json!("   ")));
        assert!(!is_populated(&json!([])));
        assert!(!is_populated(&json!({})));
        assert!(!is_populated(&json!({"a": {}, "b": null})));

        assert!(is_populated(&json!(0)));
        assert!(is_populated(&json!(false)));
        assert!(is_populated(&json!("x")));
        assert!(is_populated(&json!([null])));
        assert!(is_populated(&json!({"a": {"b": 1}})));
    }

    #[test]
    fn test_get_at() {
        let root = json!({"a": {"b": {"c": 1}}}).as_object().cloned().unwrap();
        assert_eq!(get_at(&root, &["a", "b", "c"]), Some(&json!(1)));
        assert_eq!(get_at(&root, &["a", "x"]), None);
        assert_eq!(get_at::<&str>(&root, &[]), None);
    }

    #[test]
    fn test_set_at_empty_keys() {
        let mut root = StepSnapshot::new();
        assert!(!set_at::<&str>(&mut root, &[], json!(1)));
    }

    #[test]
    fn test_leaf_paths() {
        let root = json!({
            "leadId": "u1",
            "budget": {"total": 10, "currency": "USD"},
            "tags": ["a"],
            "notes": {}
        })
        .as_object()
        .cloned()
        .unwrap();

        let mut leaves: Vec<String> = leaf_paths(&root)
            .into_iter()
            .map(|(keys, _)| keys.join("."))
            .collect();
        leaves.sort();
        assert_eq!(
            leaves,
            vec!["budget.currency", "budget.total", "leadId", "notes", "tags"]
        );
    }

    #[test]
    fn test_compact() {
        let mut root = json!({
            "a": {"b": {}, "c": []},
            "d": [1],
            "e": null
        })
        .as_object()
        .cloned()
        .unwrap();
        compact(&mut root);
        assert_eq!(serde_json::Value::Object(root), json!({"d": [1], "e": null}));
    }
}
