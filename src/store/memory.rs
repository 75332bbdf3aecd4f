//! In-memory document store using `DashMap`.
//!
//! Data is lost on process restart. Used by tests and `memory://` runs.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde_json::Value;

use super::{apply_set, validate_id, Document, DocumentStore, ID_FIELD};
use crate::{Error, Result};

/// In-memory collections keyed by name, documents ordered by id.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: DashMap<String, BTreeMap<String, Document>>,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in `collection`.
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |c| c.len())
    }

    /// Check whether `collection` holds no documents.
    #[must_use]
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn insert(&self, collection: &str, id: &str, mut document: Document) -> Result<()> {
        validate_id(id)?;
        let mut docs = self.collections.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return Err(Error::DuplicateId {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        docs.insert(id.to_string(), document);
        Ok(())
    }

    fn find(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id).cloned()))
    }

    fn set_fields(&self, collection: &str, id: &str, fields: &Document) -> Result<bool> {
        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(false);
        };
        let Some(doc) = docs.get_mut(id) else {
            return Ok(false);
        };
        // Apply to a copy so a bad path leaves the stored document untouched
        let mut updated = doc.clone();
        apply_set(&mut updated, fields)?;
        *doc = updated;
        Ok(true)
    }

    fn ids(&self, collection: &str) -> Result<Vec<String>> {
        Ok(self
            .collections
            .get(collection)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default())
    }
}
