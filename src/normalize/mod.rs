//! Key normalization
//!
//! Canonicalizes identifiers, enum values and free-text labels so that
//! values from different slots compare equal. Nothing here fails: values
//! that do not normalize cleanly pass through and are left to reference
//! validation.

use regex::Regex;
use serde_json::Value;

use crate::config::{EnumTable, LabelField, StepSchema};
use crate::error::{Error, Result};
use crate::snapshot::StepSnapshot;

/// Strings that mean "no id" wherever an id is expected
const ABSENT_MARKERS: [&str; 3] = ["undefined", "unknown", "null"];

/// Everything a normalized label may not contain; letters of any script
/// and decimal digits survive
const LABEL_STRIP_PATTERN: &str = r"[^\p{Alphabetic}\p{Nd}]+";

/// Outcome of normalizing an identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdToken {
    /// A usable id, trimmed and coerced to string
    Present(String),
    /// Empty, null or an absent marker such as `"undefined"`
    Absent,
    /// Not an id-shaped value; passed through untouched
    Opaque,
}

/// Normalize a stable identifier value
pub fn normalize_id(value: &Value) -> IdToken {
    match value {
        Value::String(raw) => normalize_id_str(raw),
        Value::Number(n) => IdToken::Present(n.to_string()),
        Value::Null => IdToken::Absent,
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => IdToken::Opaque,
    }
}

/// Normalize a stable identifier string
pub fn normalize_id_str(raw: &str) -> IdToken {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || ABSENT_MARKERS
            .iter()
            .any(|marker| trimmed.eq_ignore_ascii_case(marker))
    {
        IdToken::Absent
    } else {
        IdToken::Present(trimmed.to_string())
    }
}

/// Canonicalizes ids, enums and labels for one engine instance
pub struct KeyNormalizer {
    enums: EnumTable,
    label_strip: Regex,
}

impl KeyNormalizer {
    /// Create a normalizer over the given enum casing tables
    pub fn new(enums: EnumTable) -> Result<Self> {
        let label_strip = Regex::new(LABEL_STRIP_PATTERN)
            .map_err(|e| Error::Internal(format!("Invalid label pattern: {}", e)))?;
        Ok(Self { enums, label_strip })
    }

    /// Lower-case, trim and strip non-alphanumerics from a label
    pub fn normalize_label(&self, raw: &str) -> String {
        let lowered = raw.trim().to_lowercase();
        self.label_strip.replace_all(&lowered, "").into_owned()
    }

    /// Canonical (internal) form of an enum value.
    ///
    /// Values matching a known canonical or storage spelling map to the
    /// canonical key; anything else is upper-cased with `-` and spaces
    /// folded to `_`.
    pub fn canonical_enum(&self, enum_type: &str, raw: &str) -> String {
        let trimmed = raw.trim();
        if let Some(table) = self.enums.get(enum_type) {
            let known = table.iter().find(|(canonical, storage)| {
                canonical.eq_ignore_ascii_case(trimmed) || storage.eq_ignore_ascii_case(trimmed)
            });
            if let Some((canonical, _)) = known {
                return canonical.clone();
            }
        }
        fold_enum(trimmed)
    }

    /// Storage spelling of an enum value; unknown values keep their
    /// canonical form
    pub fn storage_enum(&self, enum_type: &str, raw: &str) -> String {
        let canonical = self.canonical_enum(enum_type, raw);
        self.enums
            .get(enum_type)
            .and_then(|table| table.get(&canonical))
            .cloned()
            .unwrap_or(canonical)
    }

    /// Re-case an enum-typed value (string or array of strings) for storage
    pub fn storage_value(&self, enum_type: &str, value: &Value) -> Value {
        match value {
            Value::String(raw) => Value::String(self.storage_enum(enum_type, raw)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.storage_value(enum_type, item))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Normalize a raw slot fragment in place
    pub fn normalize_snapshot(&self, schema: &StepSchema, snapshot: &mut StepSnapshot) {
        self.normalize(schema, snapshot, false);
    }

    /// Normalize a caller edit in place. Explicit nulls are kept, since in
    /// an edit they mean "clear this field".
    pub fn normalize_edit(&self, schema: &StepSchema, edit: &mut StepSnapshot) {
        self.normalize(schema, edit, true);
    }

    fn normalize(&self, schema: &StepSchema, snapshot: &mut StepSnapshot, keep_nulls: bool) {
        for reference in &schema.references {
            reference
                .path
                .retain_mut(snapshot, &mut |leaf| normalize_reference_leaf(leaf, keep_nulls));
        }

        for (path, enum_type) in schema.enum_fields() {
            path.retain_mut(snapshot, &mut |leaf| {
                self.canonicalize_enum_leaf(enum_type, leaf);
                true
            });
        }

        for label in &schema.labels {
            label.path.retain_mut(snapshot, &mut |collection| {
                self.annotate_collection(label, collection);
                true
            });
        }
    }

    fn canonicalize_enum_leaf(&self, enum_type: &str, leaf: &mut Value) {
        match leaf {
            Value::String(raw) => *raw = self.canonical_enum(enum_type, raw),
            Value::Array(items) => {
                for item in items {
                    self.canonicalize_enum_leaf(enum_type, item);
                }
            }
            _ => {}
        }
    }

    fn annotate_collection(&self, label: &LabelField, collection: &mut Value) {
        let entries: Box<dyn Iterator<Item = &mut Value>> = match collection {
            Value::Array(items) => Box::new(items.iter_mut()),
            Value::Object(map) => Box::new(map.values_mut()),
            _ => return,
        };

        for entry in entries {
            let Value::Object(fields) = entry else {
                continue;
            };
            let normalized = match fields.get(&label.label_key) {
                Some(Value::String(raw)) => self.normalize_label(raw),
                _ => continue,
            };
            if !normalized.is_empty() {
                fields.insert(label.normalized_key.clone(), Value::String(normalized));
            }
        }
    }
}

fn fold_enum(raw: &str) -> String {
    raw.chars()
        .map(|c| if c == '-' || c.is_whitespace() { '_' } else { c })
        .collect::<String>()
        .to_uppercase()
}

/// Normalize one reference leaf (scalar id or array of ids).
/// Returns `false` when the leaf should be removed.
fn normalize_reference_leaf(leaf: &mut Value, keep_nulls: bool) -> bool {
    match leaf {
        Value::Null => keep_nulls,
        Value::Array(items) => {
            items.retain_mut(|item| match normalize_id(item) {
                IdToken::Present(id) => {
                    *item = Value::String(id);
                    true
                }
                IdToken::Absent => false,
                IdToken::Opaque => true,
            });
            !items.is_empty() || keep_nulls
        }
        _ => match normalize_id(leaf) {
            IdToken::Present(id) => {
                *leaf = Value::String(id);
                true
            }
            IdToken::Absent => false,
            IdToken::Opaque => true,
        },
    }
}
