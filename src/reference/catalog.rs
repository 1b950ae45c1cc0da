//! In-memory reference catalog
//!
//! Answers lookups from a fixed map of entity type → known ids. The JSON
//! form is `{ "user": ["u1", "u2"], "product": ["p1"] }`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::ReferenceResolver;
use crate::error::Result;

/// Fixed catalog of known entity ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InMemoryCatalog {
    entities: HashMap<String, HashSet<String>>,
}

impl InMemoryCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add ids of an entity type
    pub fn with<I, S>(mut self, entity_type: &str, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities
            .entry(entity_type.to_string())
            .or_default()
            .extend(ids.into_iter().map(Into::into));
        self
    }

    /// Register one id
    pub fn insert(&mut self, entity_type: &str, id: impl Into<String>) {
        self.entities
            .entry(entity_type.to_string())
            .or_default()
            .insert(id.into());
    }

    pub fn contains(&self, entity_type: &str, id: &str) -> bool {
        self.entities
            .get(entity_type)
            .is_some_and(|ids| ids.contains(id))
    }

    /// Load a catalog from a JSON file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl ReferenceResolver for InMemoryCatalog {
    async fn resolve_existing(&self, entity_type: &str, ids: &[String]) -> Result<HashSet<String>> {
        let Some(known) = self.entities.get(entity_type) else {
            return Ok(HashSet::new());
        };
        Ok(ids.iter().filter(|id| known.contains(*id)).cloned().collect())
    }
}
