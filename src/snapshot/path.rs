//! Dotted field paths into step snapshots
//!
//! A path such as `team.*.userId` addresses values inside a snapshot tree.
//! The `*` segment matches every value of an object and every element of
//! an array, which lets schema declarations reach into collections.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Error, Result};

const WILDCARD: &str = "*";

/// One segment of a field path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// Named object key
    Key(String),
    /// Every object value or array element
    Any,
}

/// Parsed dotted path, serialized as its dotted string form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Parse a dotted path. Empty paths and empty segments are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::Config("field path is empty".to_string()));
        }

        let segments = trimmed
            .split('.')
            .map(|segment| {
                let segment = segment.trim();
                if segment.is_empty() {
                    Err(Error::Config(format!(
                        "field path '{}' has an empty segment",
                        trimmed
                    )))
                } else if segment == WILDCARD {
                    Ok(Segment::Any)
                } else {
                    Ok(Segment::Key(segment.to_string()))
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { segments })
    }

    /// Build a path from already-split segments
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when the path has no wildcard segments
    pub fn is_concrete(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Key(_)))
    }

    /// Key sequence of a concrete path
    pub fn keys(&self) -> Option<Vec<&str>> {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Key(key) => Some(key.as_str()),
                Segment::Any => None,
            })
            .collect()
    }

    /// Value at a concrete path
    pub fn get<'a>(&self, root: &'a Map<String, Value>) -> Option<&'a Value> {
        let keys = self.keys()?;
        super::get_at(root, &keys)
    }

    /// Set the value at a concrete path, creating intermediate objects.
    ///
    /// Returns `false` for wildcard paths.
    pub fn set(&self, root: &mut Map<String, Value>, value: Value) -> bool {
        match self.keys() {
            Some(keys) => super::set_at(root, &keys, value),
            None => false,
        }
    }

    /// Every value matched by the path
    pub fn collect<'a>(&self, root: &'a Map<String, Value>) -> Vec<&'a Value> {
        let mut out = Vec::new();
        collect_from_map(root, &self.segments, &mut out);
        out
    }

    /// Visit every value matched by the path, removing it from its parent
    /// object or array when `keep` returns `false`.
    pub fn retain_mut(
        &self,
        root: &mut Map<String, Value>,
        keep: &mut dyn FnMut(&mut Value) -> bool,
    ) {
        retain_in_map(root, &self.segments, keep);
    }
}

fn collect_from_map<'a>(
    map: &'a Map<String, Value>,
    segments: &[Segment],
    out: &mut Vec<&'a Value>,
) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    match head {
        Segment::Key(key) => {
            if let Some(child) = map.get(key) {
                collect_from_value(child, rest, out);
            }
        }
        Segment::Any => {
            for child in map.values() {
                collect_from_value(child, rest, out);
            }
        }
    }
}

fn collect_from_value<'a>(value: &'a Value, segments: &[Segment], out: &mut Vec<&'a Value>) {
    if segments.is_empty() {
        out.push(value);
        return;
    }
    match value {
        Value::Object(map) => collect_from_map(map, segments, out),
        Value::Array(items) if segments[0] == Segment::Any => {
            for item in items {
                collect_from_value(item, &segments[1..], out);
            }
        }
        _ => {}
    }
}

fn retain_in_map(
    map: &mut Map<String, Value>,
    segments: &[Segment],
    keep: &mut dyn FnMut(&mut Value) -> bool,
) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    match head {
        Segment::Key(key) => {
            let drop = match map.get_mut(key) {
                Some(child) => !retain_in_value(child, rest, &mut *keep),
                None => false,
            };
            if drop {
                map.remove(key);
            }
        }
        Segment::Any => map.retain(|_, child| retain_in_value(child, rest, &mut *keep)),
    }
}

fn retain_in_value(
    value: &mut Value,
    segments: &[Segment],
    keep: &mut dyn FnMut(&mut Value) -> bool,
) -> bool {
    if segments.is_empty() {
        return keep(value);
    }
    match value {
        Value::Object(map) => retain_in_map(map, segments, keep),
        Value::Array(items) if segments[0] == Segment::Any => {
            // Elements emptied by removal go with it
            items.retain_mut(|item| {
                let had_entries = has_entries(item);
                retain_in_value(item, &segments[1..], &mut *keep)
                    && !(had_entries && !has_entries(item))
            });
        }
        _ => {}
    }
    true
}

fn has_entries(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match segment {
                Segment::Key(key) => f.write_str(key)?,
                Segment::Any => f.write_str(WILDCARD)?,
            }
        }
        Ok(())
    }
}

impl TryFrom<String> for FieldPath {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let path = FieldPath::parse("team.*.userId").unwrap();
        assert_eq!(path.segments().len(), 3);
        assert_eq!(path.segments()[1], Segment::Any);
        assert!(!path.is_concrete());
        assert_eq!(path.to_string(), "team.*.userId");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("a..b").is_err());
        assert!(FieldPath::parse("  ").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let path: FieldPath = serde_json::from_str("\"budget.total\"").unwrap();
        assert_eq!(path.keys().unwrap(), vec!["budget", "total"]);
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"budget.total\"");
        assert!(serde_json::from_str::<FieldPath>("\"\"").is_err());
    }

    #[test]
    fn test_get_and_set_concrete() {
        let mut root = snapshot(json!({"budget": {"total": 10}}));
        let path = FieldPath::parse("budget.total").unwrap();
        assert_eq!(path.get(&root), Some(&json!(10)));

        let deep = FieldPath::parse("meta.owner.id").unwrap();
        assert!(deep.set(&mut root, json!("u1")));
        assert_eq!(root["meta"]["owner"]["id"], json!("u1"));
    }

    #[test]
    fn test_set_rejects_wildcard() {
        let mut root = Map::new();
        let path = FieldPath::parse("team.*").unwrap();
        assert!(!path.set(&mut root, json!(1)));
        assert!(root.is_empty());
    }

    #[test]
    fn test_set_replaces_scalar_parent() {
        let mut root = snapshot(json!({"meta": "legacy"}));
        let path = FieldPath::parse("meta.owner").unwrap();
        assert!(path.set(&mut root, json!("u1")));
        assert_eq!(root["meta"], json!({"owner": "u1"}));
    }

    #[test]
    fn test_collect_wildcards() {
        let root = snapshot(json!({
            "team": [{"userId": "u1"}, {"userId": "u2"}, {"role": "x"}],
            "assignments": {"a": ["u3"], "b": ["u4"]}
        }));
        let ids = FieldPath::parse("team.*.userId").unwrap().collect(&root);
        assert_eq!(ids, vec![&json!("u1"), &json!("u2")]);

        let lists = FieldPath::parse("assignments.*").unwrap().collect(&root);
        assert_eq!(lists.len(), 2);
    }

    #[test]
    fn test_retain_removes_from_parents() {
        let mut root = snapshot(json!({
            "leadId": "u9",
            "team": [{"userId": "u1"}, {"userId": "u9"}],
            "assignments": {"a": "u1", "b": "u9"}
        }));

        let mut drop_u9 = |v: &mut Value| *v != json!("u9");
        FieldPath::parse("leadId").unwrap().retain_mut(&mut root, &mut drop_u9);
        FieldPath::parse("assignments.*").unwrap().retain_mut(&mut root, &mut drop_u9);
        FieldPath::parse("team.*.userId").unwrap().retain_mut(&mut root, &mut drop_u9);

        assert!(root.get("leadId").is_none());
        assert_eq!(root["assignments"], json!({"a": "u1"}));
        assert_eq!(root["team"], json!([{"userId": "u1"}]));
    }

    #[test]
    fn test_retain_keeps_elements_with_other_keys() {
        let mut root = snapshot(json!({
            "team": [{"userId": "u9", "role": "WRITER"}, {"userId": "u9"}, {}]
        }));
        FieldPath::parse("team.*.userId")
            .unwrap()
            .retain_mut(&mut root, &mut |v: &mut Value| *v != json!("u9"));

        // Already-empty elements are left alone; only emptied ones go
        assert_eq!(root["team"], json!([{"role": "WRITER"}, {}]));
    }
}
