//! Write payload construction
//!
//! Turns one step's edit into targeted deep-merge patches for the canonical
//! and legacy snapshots, plus the ownership fields the patch touches. The
//! payload never carries a full step snapshot, so a concurrent write to
//! another path of the same step survives at storage.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::config::StepSchema;
use crate::normalize::KeyNormalizer;
use crate::snapshot::{
    deep_merge, get_at, is_populated, leaf_paths, set_at, FieldPath, StepSnapshot,
};

/// Partial update handed to the storage collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WritePayload {
    /// Deep-merge patch per step for the canonical snapshot field
    #[serde(default)]
    pub canonical_patch: BTreeMap<u32, StepSnapshot>,
    /// Same patches, mirrored into the legacy snapshot field
    #[serde(default)]
    pub legacy_patch: BTreeMap<u32, StepSnapshot>,
    /// Top-level record fields to set, in storage casing
    #[serde(default)]
    pub ownership_fields: Map<String, Value>,
}

impl WritePayload {
    pub fn is_empty(&self) -> bool {
        self.canonical_patch.is_empty()
            && self.legacy_patch.is_empty()
            && self.ownership_fields.is_empty()
    }
}

/// Everything needed to write one step
pub struct StepWrite<'a> {
    pub step: u32,
    pub schema: Option<&'a StepSchema>,
    /// Hydrated view of the step before the edit
    pub current: &'a StepSnapshot,
    /// Paths derivation filled in `current`
    pub derived: &'a [FieldPath],
    /// Normalized caller edit
    pub edit: &'a StepSnapshot,
}

/// Builds write payloads from edits
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    persist_derived: bool,
}

impl SnapshotWriter {
    pub fn new(persist_derived: bool) -> Self {
        Self { persist_derived }
    }

    pub fn build(&self, write: &StepWrite<'_>, normalizer: &KeyNormalizer) -> WritePayload {
        let mut payload = WritePayload::default();
        let patch = self.step_patch(write);
        if patch.is_empty() {
            return payload;
        }

        if let Some(schema) = write.schema {
            payload.ownership_fields = ownership_updates(schema, write.current, &patch, normalizer);
        }

        tracing::debug!(
            step = write.step,
            paths = leaf_paths(&patch).len(),
            ownership = payload.ownership_fields.len(),
            "Built write payload"
        );

        payload.legacy_patch.insert(write.step, patch.clone());
        payload.canonical_patch.insert(write.step, patch);
        payload
    }

    /// The edit plus any derived value the edit leaves alone
    fn step_patch(&self, write: &StepWrite<'_>) -> StepSnapshot {
        let mut patch = write.edit.clone();
        if !self.persist_derived {
            return patch;
        }

        let edited: Vec<Vec<String>> = leaf_paths(write.edit)
            .into_iter()
            .map(|(keys, _)| keys)
            .collect();

        for path in write.derived {
            let Some(keys) = path.keys() else {
                continue;
            };
            if edited.iter().any(|leaf| overlaps(leaf, &keys)) {
                continue;
            }
            if let Some(value) = get_at(write.current, &keys) {
                set_at(&mut patch, &keys, value.clone());
            }
        }
        patch
    }
}

/// Ownership fields whose path the patch touches, with their post-write
/// value.
///
/// Authoritative fields always follow the patch. Other ownership fields are
/// only written, as null, when the patch leaves their path unpopulated.
fn ownership_updates(
    schema: &StepSchema,
    current: &StepSnapshot,
    patch: &StepSnapshot,
    normalizer: &KeyNormalizer,
) -> Map<String, Value> {
    let touched: Vec<Vec<String>> = leaf_paths(patch).into_iter().map(|(keys, _)| keys).collect();

    let mut after = current.clone();
    deep_merge(&mut after, patch);

    let mut fields = Map::new();
    for owned in &schema.ownership {
        let Some(keys) = owned.path.keys() else {
            continue;
        };
        if !touched.iter().any(|leaf| overlaps(leaf, &keys)) {
            continue;
        }

        let value = get_at(&after, &keys).cloned().unwrap_or(Value::Null);
        if !owned.authoritative {
            if !is_populated(&value) {
                fields.insert(owned.field.clone(), Value::Null);
            }
            continue;
        }
        let value = match &owned.enum_type {
            Some(enum_type) => normalizer.storage_value(enum_type, &value),
            None => value,
        };
        fields.insert(owned.field.clone(), value);
    }
    fields
}

/// True when one key path is a prefix of the other
fn overlaps(a: &[String], b: &[&str]) -> bool {
    a.iter().zip(b).all(|(x, y)| x == y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{proposal_wizard_config, HydrationConfig};
    use serde_json::json;

    fn snapshot(value: Value) -> StepSnapshot {
        value.as_object().cloned().unwrap()
    }

    fn normalizer() -> KeyNormalizer {
        KeyNormalizer::new(HydrationConfig::default().enums).unwrap()
    }

    fn build(
        writer: &SnapshotWriter,
        step: u32,
        current: Value,
        derived: &[&str],
        edit: Value,
    ) -> WritePayload {
        let config = proposal_wizard_config();
        let current = snapshot(current);
        let edit = snapshot(edit);
        let derived: Vec<FieldPath> = derived.iter().map(|p| FieldPath::parse(p).unwrap()).collect();
        let write = StepWrite {
            step,
            schema: config.step_schema(step),
            current: &current,
            derived: &derived,
            edit: &edit,
        };
        writer.build(&write, &normalizer())
    }

    #[test]
    fn test_edit_beats_canonical_in_patch() {
        let payload = build(
            &SnapshotWriter::new(true),
            2,
            json!({"leadId": "u2"}),
            &[],
            json!({"leadId": "u3"}),
        );
        assert_eq!(payload.canonical_patch[&2]["leadId"], json!("u3"));
        assert_eq!(payload.legacy_patch[&2]["leadId"], json!("u3"));
        assert_eq!(payload.ownership_fields["leadId"], json!("u3"));
    }

    #[test]
    fn test_patch_holds_only_touched_paths() {
        let payload = build(
            &SnapshotWriter::new(true),
            4,
            json!({"pricingModel": "FIXED_FEE", "pricing": {"total": 100, "currency": "USD"}}),
            &[],
            json!({"pricing": {"total": 250}}),
        );
        assert_eq!(payload.canonical_patch[&4], snapshot(json!({"pricing": {"total": 250}})));
        assert_eq!(payload.ownership_fields, snapshot(json!({"totalValue": 250})));
    }

    #[test]
    fn test_non_authoritative_ownership_not_emitted() {
        let payload = build(
            &SnapshotWriter::new(true),
            4,
            json!({"pricing": {"total": 100, "currency": "USD"}}),
            &[],
            json!({"pricing": {"currency": "EUR"}}),
        );
        assert!(payload.ownership_fields.is_empty());
        assert_eq!(payload.canonical_patch[&4]["pricing"]["currency"], json!("EUR"));
    }

    #[test]
    fn test_cleared_non_authoritative_ownership_written_as_null() {
        let payload = build(
            &SnapshotWriter::new(true),
            4,
            json!({"pricing": {"total": 100, "currency": "USD"}}),
            &[],
            json!({"pricing": {"currency": null}}),
        );
        assert_eq!(payload.ownership_fields, snapshot(json!({"currency": null})));

        let payload = build(
            &SnapshotWriter::new(true),
            4,
            json!({"pricing": {"total": 100, "currency": "USD"}}),
            &[],
            json!({"pricing": null}),
        );
        assert_eq!(
            payload.ownership_fields,
            snapshot(json!({"totalValue": null, "currency": null}))
        );
    }

    #[test]
    fn test_whole_object_edit_touches_nested_ownership() {
        let payload = build(
            &SnapshotWriter::new(true),
            4,
            json!({"pricing": {"total": 100}}),
            &[],
            json!({"pricing": {"total": 300, "currency": "EUR"}}),
        );
        assert_eq!(payload.ownership_fields["totalValue"], json!(300));
    }

    #[test]
    fn test_ownership_enum_recased_for_storage() {
        let payload = build(
            &SnapshotWriter::new(true),
            1,
            json!({"title": "Bid", "status": "DRAFT"}),
            &[],
            json!({"status": "WON"}),
        );
        assert_eq!(payload.canonical_patch[&1]["status"], json!("WON"));
        assert_eq!(payload.ownership_fields, snapshot(json!({"status": "won"})));
    }

    #[test]
    fn test_cleared_ownership_written_as_null() {
        let payload = build(
            &SnapshotWriter::new(true),
            2,
            json!({"leadId": "u2"}),
            &[],
            json!({"leadId": null}),
        );
        assert_eq!(payload.canonical_patch[&2]["leadId"], Value::Null);
        assert_eq!(payload.ownership_fields["leadId"], Value::Null);
    }

    #[test]
    fn test_derived_values_persisted_with_edit() {
        let current = json!({
            "reviewerId": "u1",
            "sectionAssignments": {"s1": ["u2"]},
            "sections": [{"id": "s1", "title": "Intro"}]
        });

        let payload = build(
            &SnapshotWriter::new(true),
            5,
            current.clone(),
            &["sectionAssignments", "reviewerId"],
            json!({"reviewerId": "u7"}),
        );
        assert_eq!(
            payload.canonical_patch[&5],
            snapshot(json!({"reviewerId": "u7", "sectionAssignments": {"s1": ["u2"]}}))
        );

        let payload = build(
            &SnapshotWriter::new(false),
            5,
            current,
            &["sectionAssignments", "reviewerId"],
            json!({"reviewerId": "u7"}),
        );
        assert_eq!(payload.canonical_patch[&5], snapshot(json!({"reviewerId": "u7"})));
    }

    #[test]
    fn test_derived_under_edited_subtree_not_overridden() {
        let payload = build(
            &SnapshotWriter::new(true),
            5,
            json!({"sectionAssignments": {"s1": ["u2"]}}),
            &["sectionAssignments"],
            json!({"sectionAssignments": {"s1": ["u9"]}}),
        );
        assert_eq!(payload.canonical_patch[&5]["sectionAssignments"], json!({"s1": ["u9"]}));
    }

    #[test]
    fn test_empty_edit_yields_empty_payload() {
        let payload = build(&SnapshotWriter::new(false), 2, json!({"leadId": "u2"}), &[], json!({}));
        assert!(payload.is_empty());
    }

    #[test]
    fn test_payload_serializes_camel_case() {
        let payload = build(&SnapshotWriter::new(true), 2, json!({}), &[], json!({"leadId": "u3"}));
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["canonicalPatch"]["2"]["leadId"], json!("u3"));
        assert_eq!(value["legacyPatch"]["2"]["leadId"], json!("u3"));
        assert_eq!(value["ownershipFields"]["leadId"], json!("u3"));

        let back: WritePayload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }
}
