//! Storage-side deep merge
//!
//! This is the merge the storage collaborator applies to write patches:
//! objects merge key by key, every other patch value replaces the target.
//! Unlike the hydration merge, an unpopulated patch value does win here.

use serde_json::{Map, Value};

/// Deep-merge `patch` into `target`
pub fn deep_merge(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, incoming) in patch {
        match (target.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(child)) => deep_merge(existing, child),
            _ => {
                target.insert(key.clone(), incoming.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_merge_keeps_untouched_siblings() {
        let mut target = obj(json!({"budget": {"total": 10, "currency": "USD"}, "leadId": "u1"}));
        deep_merge(&mut target, &obj(json!({"budget": {"total": 20}})));
        assert_eq!(
            Value::Object(target),
            json!({"budget": {"total": 20, "currency": "USD"}, "leadId": "u1"})
        );
    }

    #[test]
    fn test_merge_replaces_arrays_and_scalars() {
        let mut target = obj(json!({"productIds": ["p1", "p2"], "meta": "old"}));
        deep_merge(
            &mut target,
            &obj(json!({"productIds": ["p3"], "meta": {"v": 2}})),
        );
        assert_eq!(
            Value::Object(target),
            json!({"productIds": ["p3"], "meta": {"v": 2}})
        );
    }

    #[test]
    fn test_merge_null_clears() {
        let mut target = obj(json!({"leadId": "u1"}));
        deep_merge(&mut target, &obj(json!({"leadId": null})));
        assert_eq!(target["leadId"], Value::Null);
    }
}
