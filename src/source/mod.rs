//! Source slots and raw fragment collection
//!
//! A record can hold a step's data in several places at once. The
//! collector pulls one raw fragment per slot out of a record, unwrapping
//! the storage envelope and treating anything unparseable as empty.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;

use crate::config::{LayoutConfig, StepSchema};
use crate::error::Result;
use crate::snapshot::StepSnapshot;

/// Named location of step data, ordered from highest to lowest precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSlot {
    /// Latest structured per-step data
    CanonicalSnapshot,
    /// Top-level record fields the backend treats as authoritative
    OwnershipFields,
    /// Older structured per-step data kept for compatibility
    LegacySnapshot,
    /// Values computed from sibling steps; never stored
    DerivedDefaults,
}

impl SourceSlot {
    /// All slots in precedence order
    pub const ORDERED: [SourceSlot; 4] = [
        SourceSlot::CanonicalSnapshot,
        SourceSlot::OwnershipFields,
        SourceSlot::LegacySnapshot,
        SourceSlot::DerivedDefaults,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SourceSlot::CanonicalSnapshot => "canonical_snapshot",
            SourceSlot::OwnershipFields => "ownership_fields",
            SourceSlot::LegacySnapshot => "legacy_snapshot",
            SourceSlot::DerivedDefaults => "derived_defaults",
        }
    }
}

impl fmt::Display for SourceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One slot's contribution to a step
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFragment {
    pub slot: SourceSlot,
    pub snapshot: StepSnapshot,
}

impl SourceFragment {
    pub fn new(slot: SourceSlot, snapshot: StepSnapshot) -> Self {
        Self { slot, snapshot }
    }

    pub fn empty(slot: SourceSlot) -> Self {
        Self::new(slot, StepSnapshot::new())
    }
}

/// The parent entity being edited, as the storage collaborator hands it over
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a JSON object
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

/// A slot value after envelope unwrapping
enum Tree<'a> {
    Present(Cow<'a, Map<String, Value>>),
    Empty,
    Malformed,
}

/// Extracts per-slot raw fragments from records
pub struct SourceCollector {
    layout: LayoutConfig,
}

impl SourceCollector {
    pub fn new(layout: LayoutConfig) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    /// Collect the raw fragments of one step, in precedence order.
    ///
    /// `DerivedDefaults` is always empty here; derivation fills it later.
    pub fn collect(
        &self,
        record: &Record,
        step: u32,
        schema: Option<&StepSchema>,
    ) -> Vec<SourceFragment> {
        SourceSlot::ORDERED
            .iter()
            .map(|&slot| {
                let snapshot = match slot {
                    SourceSlot::CanonicalSnapshot => {
                        self.step_fragment(record, &self.layout.canonical_field, step, slot)
                    }
                    SourceSlot::LegacySnapshot => {
                        self.step_fragment(record, &self.layout.legacy_field, step, slot)
                    }
                    SourceSlot::OwnershipFields => self.ownership_fragment(record, schema),
                    SourceSlot::DerivedDefaults => StepSnapshot::new(),
                };
                SourceFragment::new(slot, snapshot)
            })
            .collect()
    }

    /// Steps that have an entry in the canonical or legacy snapshot fields
    pub fn stored_steps(&self, record: &Record) -> BTreeSet<u32> {
        let mut steps = BTreeSet::new();
        for field in [&self.layout.canonical_field, &self.layout.legacy_field] {
            let Some(raw) = record.get(field) else {
                continue;
            };
            if let Tree::Present(container) = self.as_tree(raw) {
                steps.extend(
                    container
                        .keys()
                        .filter_map(|key| self.layout.parse_step_key(key)),
                );
            }
        }
        steps
    }

    /// Strip the `{ set: value }` storage envelope, if present
    pub fn unwrap_envelope<'a>(&self, value: &'a Value) -> &'a Value {
        match value {
            Value::Object(map) if map.len() == 1 => {
                map.get(&self.layout.envelope_key).unwrap_or(value)
            }
            _ => value,
        }
    }

    fn step_fragment(
        &self,
        record: &Record,
        field: &str,
        step: u32,
        slot: SourceSlot,
    ) -> StepSnapshot {
        let Some(raw) = record.get(field) else {
            return StepSnapshot::new();
        };

        let container = match self.as_tree(raw) {
            Tree::Present(container) => container,
            Tree::Empty => return StepSnapshot::new(),
            Tree::Malformed => {
                tracing::warn!(slot = %slot, step, "Slot field is not a JSON object, treating as empty");
                return StepSnapshot::new();
            }
        };

        let entry = container
            .get(&self.layout.step_key(step))
            .or_else(|| container.get(&step.to_string()));
        let Some(entry) = entry else {
            return StepSnapshot::new();
        };

        match self.as_tree(entry) {
            Tree::Present(snapshot) => snapshot.into_owned(),
            Tree::Empty => StepSnapshot::new(),
            Tree::Malformed => {
                tracing::warn!(slot = %slot, step, "Step fragment is not a JSON object, treating as empty");
                StepSnapshot::new()
            }
        }
    }

    fn ownership_fragment(&self, record: &Record, schema: Option<&StepSchema>) -> StepSnapshot {
        let mut snapshot = StepSnapshot::new();
        let Some(schema) = schema else {
            return snapshot;
        };

        for owned in &schema.ownership {
            let Some(raw) = record.get(&owned.field) else {
                continue;
            };
            let value = self.unwrap_envelope(raw);
            if !value.is_null() {
                owned.path.set(&mut snapshot, value.clone());
            }
        }
        snapshot
    }

    fn as_tree<'a>(&self, raw: &'a Value) -> Tree<'a> {
        match self.unwrap_envelope(raw) {
            Value::Object(map) => Tree::Present(Cow::Borrowed(map)),
            Value::Null => Tree::Empty,
            Value::String(text) if text.trim().is_empty() => Tree::Empty,
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => Tree::Present(Cow::Owned(map)),
                _ => Tree::Malformed,
            },
            _ => Tree::Malformed,
        }
    }
}
