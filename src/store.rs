//! Reference storage collaborator
//!
//! Applies write payloads the way a storage backend is expected to: step
//! patches are deep-merged into the canonical and legacy snapshot fields,
//! ownership fields are set. `InMemoryRecordStore` applies each payload
//! under a write lock, so one payload lands atomically per record.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::LayoutConfig;
use crate::error::{Error, Result};
use crate::snapshot::{deep_merge, StepSnapshot};
use crate::source::Record;
use crate::writer::WritePayload;

/// Apply a write payload to a record in place
pub fn apply_payload(record: &mut Record, payload: &WritePayload, layout: &LayoutConfig) {
    merge_step_patches(record, &layout.canonical_field, &payload.canonical_patch, layout);
    merge_step_patches(record, &layout.legacy_field, &payload.legacy_patch, layout);
    for (field, value) in &payload.ownership_fields {
        record.set(field.clone(), value.clone());
    }
}

fn merge_step_patches(
    record: &mut Record,
    field: &str,
    patches: &BTreeMap<u32, StepSnapshot>,
    layout: &LayoutConfig,
) {
    if patches.is_empty() {
        return;
    }

    let mut container = record
        .get(field)
        .map(|raw| stored_object(raw, layout))
        .unwrap_or_default();

    for (step, patch) in patches {
        // Keep writing to a bare-number entry if that is what the record uses
        let key = if container.contains_key(&step.to_string())
            && !container.contains_key(&layout.step_key(*step))
        {
            step.to_string()
        } else {
            layout.step_key(*step)
        };

        let mut entry = container
            .get(&key)
            .map(|raw| stored_object(raw, layout))
            .unwrap_or_default();
        deep_merge(&mut entry, patch);
        container.insert(key, Value::Object(entry));
    }

    record.set(field, Value::Object(container));
}

/// Stored object behind an optional envelope or JSON string; anything else
/// starts over as an empty object
fn stored_object(raw: &Value, layout: &LayoutConfig) -> Map<String, Value> {
    let inner = match raw {
        Value::Object(map) if map.len() == 1 => map.get(&layout.envelope_key).unwrap_or(raw),
        _ => raw,
    };
    match inner {
        Value::Object(map) => map.clone(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}

/// In-memory record store
pub struct InMemoryRecordStore {
    layout: LayoutConfig,
    records: Arc<RwLock<HashMap<String, Record>>>,
}

impl InMemoryRecordStore {
    /// Create an empty store for the given snapshot layout
    pub fn new(layout: LayoutConfig) -> Self {
        Self {
            layout,
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store a record under an id, replacing any previous one
    pub async fn insert(&self, id: impl Into<String>, record: Record) {
        self.records.write().await.insert(id.into(), record);
    }

    pub async fn get(&self, id: &str) -> Option<Record> {
        self.records.read().await.get(id).cloned()
    }

    /// Apply a payload to a stored record
    pub async fn apply(&self, id: &str, payload: &WritePayload) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| Error::Storage(format!("Record not found: {}", id)))?;
        apply_payload(record, payload, &self.layout);
        tracing::debug!(
            steps = payload.canonical_patch.len(),
            ownership = payload.ownership_fields.len(),
            "Applied write payload"
        );
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new(LayoutConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn payload(value: Value) -> WritePayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_apply_deep_merges_into_both_snapshots() {
        let mut rec = record(json!({
            "wizardState": {"step4": {"pricing": {"total": 100, "currency": "USD"}}},
            "stepData": {"step4": {"pricingModel": "FIXED_FEE"}}
        }));
        let p = payload(json!({
            "canonicalPatch": {"4": {"pricing": {"total": 250}}},
            "legacyPatch": {"4": {"pricing": {"total": 250}}},
            "ownershipFields": {"totalValue": 250}
        }));

        apply_payload(&mut rec, &p, &LayoutConfig::default());

        assert_eq!(
            rec.get("wizardState"),
            Some(&json!({"step4": {"pricing": {"total": 250, "currency": "USD"}}}))
        );
        assert_eq!(
            rec.get("stepData"),
            Some(&json!({"step4": {"pricingModel": "FIXED_FEE", "pricing": {"total": 250}}}))
        );
        assert_eq!(rec.get("totalValue"), Some(&json!(250)));
    }

    #[test]
    fn test_apply_unwraps_envelopes_and_strings() {
        let mut rec = record(json!({
            "wizardState": {"set": {"step2": {"set": {"notes": "keep"}}}},
            "stepData": "{\"step2\": {\"leadId\": \"u1\"}}"
        }));
        let p = payload(json!({
            "canonicalPatch": {"2": {"leadId": "u3"}},
            "legacyPatch": {"2": {"leadId": "u3"}}
        }));

        apply_payload(&mut rec, &p, &LayoutConfig::default());

        assert_eq!(
            rec.get("wizardState"),
            Some(&json!({"step2": {"notes": "keep", "leadId": "u3"}}))
        );
        assert_eq!(rec.get("stepData"), Some(&json!({"step2": {"leadId": "u3"}})));
    }

    #[test]
    fn test_apply_creates_missing_fields() {
        let mut rec = Record::new();
        let p = payload(json!({"canonicalPatch": {"1": {"title": "Bid"}}}));
        apply_payload(&mut rec, &p, &LayoutConfig::default());
        assert_eq!(rec.get("wizardState"), Some(&json!({"step1": {"title": "Bid"}})));
        assert!(rec.get("stepData").is_none());
    }

    #[test]
    fn test_apply_keeps_bare_step_keys() {
        let mut rec = record(json!({"stepData": {"3": {"productIds": ["p1"]}}}));
        let p = payload(json!({"legacyPatch": {"3": {"notes": "n"}}}));
        apply_payload(&mut rec, &p, &LayoutConfig::default());
        assert_eq!(
            rec.get("stepData"),
            Some(&json!({"3": {"productIds": ["p1"], "notes": "n"}}))
        );
    }

    #[test]
    fn test_malformed_field_replaced() {
        let mut rec = record(json!({"wizardState": "not json"}));
        let p = payload(json!({"canonicalPatch": {"1": {"title": "Bid"}}}));
        apply_payload(&mut rec, &p, &LayoutConfig::default());
        assert_eq!(rec.get("wizardState"), Some(&json!({"step1": {"title": "Bid"}})));
    }

    #[tokio::test]
    async fn test_store_apply() {
        let store = InMemoryRecordStore::default();
        assert!(store.is_empty().await);
        store.insert("r1", Record::new()).await;

        let p = payload(json!({"ownershipFields": {"status": "won"}}));
        store.apply("r1", &p).await.unwrap();

        let rec = store.get("r1").await.unwrap();
        assert_eq!(rec.get("status"), Some(&json!("won")));
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn test_store_insert_replaces() {
        let store = InMemoryRecordStore::default();
        tokio_test::block_on(async {
            store.insert("r1", record(json!({"title": "A"}))).await;
            store.insert("r1", record(json!({"title": "B"}))).await;
            let rec = store.get("r1").await.unwrap();
            assert_eq!(rec.get("title"), Some(&json!("B")));
            assert_eq!(store.len().await, 1);
        });
    }

    #[tokio::test]
    async fn test_store_apply_missing_record() {
        let store = InMemoryRecordStore::default();
        let err = store.apply("nope", &WritePayload::default()).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }
}
