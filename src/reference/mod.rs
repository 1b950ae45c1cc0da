//! Reference validation against an external catalog
//!
//! Reference-typed leaves are gathered per entity type and checked with a
//! single batched lookup per type; all types of a step are looked up
//! concurrently. Ids the catalog does not know are pruned silently. A
//! failing or slow lookup never prunes anything: that type's references
//! pass through and the step is reported as incompletely validated.

pub mod catalog;

pub use catalog::InMemoryCatalog;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::config::StepSchema;
use crate::error::Result;
use crate::normalize::{normalize_id, IdToken};
use crate::snapshot::{compact, StepSnapshot};

/// Catalog lookup collaborator
#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    /// Return the subset of `ids` that exist for `entity_type`.
    async fn resolve_existing(&self, entity_type: &str, ids: &[String]) -> Result<HashSet<String>>;
}

/// What validation did to one step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Pruned reference count per entity type
    pub dropped: BTreeMap<String, usize>,
    /// Entity types whose lookup failed; their references were kept
    pub unverified_types: BTreeSet<String>,
}

impl ValidationReport {
    /// True when at least one lookup failed
    pub fn is_incomplete(&self) -> bool {
        !self.unverified_types.is_empty()
    }

    pub fn dropped_total(&self) -> usize {
        self.dropped.values().sum()
    }
}

/// Prunes unresolved references from merged step snapshots
pub struct ReferenceValidator {
    resolver: Arc<dyn ReferenceResolver>,
    timeout: Duration,
}

impl ReferenceValidator {
    pub fn new(resolver: Arc<dyn ReferenceResolver>, timeout: Duration) -> Self {
        Self { resolver, timeout }
    }

    /// Validate the references of one step in place
    pub async fn validate(
        &self,
        step: u32,
        schema: &StepSchema,
        snapshot: &mut StepSnapshot,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();
        if schema.references.is_empty() {
            return report;
        }

        let mut wanted: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
        for reference in &schema.references {
            let ids = wanted.entry(reference.entity_type.as_str()).or_default();
            for leaf in reference.path.collect(snapshot) {
                match leaf {
                    Value::Array(items) => ids.extend(items.iter().filter_map(present_id)),
                    other => ids.extend(present_id(other)),
                }
            }
        }
        wanted.retain(|_, ids| !ids.is_empty());

        let lookups = wanted
            .iter()
            .map(|(entity_type, ids)| self.lookup(step, *entity_type, ids));
        let resolved: HashMap<&str, Option<HashSet<String>>> =
            futures::future::join_all(lookups).await.into_iter().collect();

        for reference in &schema.references {
            let entity_type = reference.entity_type.as_str();
            let existing = match resolved.get(entity_type) {
                Some(Some(existing)) => Some(existing),
                Some(None) => {
                    report.unverified_types.insert(entity_type.to_string());
                    continue;
                }
                // Only non-id leaves of this type; nothing can resolve
                None => None,
            };

            let mut dropped = 0usize;
            reference
                .path
                .retain_mut(snapshot, &mut |leaf| prune_leaf(leaf, existing, &mut dropped));
            if dropped > 0 {
                *report.dropped.entry(entity_type.to_string()).or_default() += dropped;
            }
        }

        if report.dropped_total() > 0 {
            compact(snapshot);
        }

        for (entity_type, dropped) in &report.dropped {
            tracing::debug!(step, entity_type = %entity_type, dropped, "Pruned unresolved references");
        }

        report
    }

    async fn lookup<'a>(
        &self,
        step: u32,
        entity_type: &'a str,
        ids: &BTreeSet<String>,
    ) -> (&'a str, Option<HashSet<String>>) {
        let ids: Vec<String> = ids.iter().cloned().collect();
        let outcome =
            tokio::time::timeout(self.timeout, self.resolver.resolve_existing(entity_type, &ids))
                .await;

        let existing = match outcome {
            Ok(Ok(existing)) => Some(existing),
            Ok(Err(_)) => {
                tracing::warn!(
                    step,
                    entity_type,
                    "Reference lookup failed, keeping references unverified"
                );
                None
            }
            Err(_) => {
                tracing::warn!(
                    step,
                    entity_type,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Reference lookup timed out, keeping references unverified"
                );
                None
            }
        };
        (entity_type, existing)
    }
}

fn present_id(value: &Value) -> Option<String> {
    match normalize_id(value) {
        IdToken::Present(id) => Some(id),
        IdToken::Absent | IdToken::Opaque => None,
    }
}

fn resolves(value: &Value, existing: Option<&HashSet<String>>) -> bool {
    match (present_id(value), existing) {
        (Some(id), Some(existing)) => existing.contains(&id),
        _ => false,
    }
}

/// Prune one reference leaf; returns `false` when the leaf itself goes
fn prune_leaf(leaf: &mut Value, existing: Option<&HashSet<String>>, dropped: &mut usize) -> bool {
    match leaf {
        Value::Array(items) => {
            let before = items.len();
            items.retain(|item| resolves(item, existing));
            *dropped += before - items.len();
            !items.is_empty()
        }
        other => {
            if resolves(other, existing) {
                true
            } else {
                *dropped += 1;
                false
            }
        }
    }
}
