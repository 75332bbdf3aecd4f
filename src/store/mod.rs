//! Document Store Module
//!
//! Schemaless JSON documents grouped in named collections and keyed by a
//! string `_id`. Updates follow MongoDB `$set` semantics: only the named
//! fields change, dotted keys address nested fields, and updating a
//! missing id matches nothing.
//!
//! # Example
//!
//! ```rust
//! use dl_tracker::store::{DocumentStore, MemoryDocumentStore};
//! use serde_json::{json, Map};
//!
//! # fn main() -> dl_tracker::Result<()> {
//! let store = MemoryDocumentStore::new();
//! let mut doc = Map::new();
//! doc.insert("epoch_results".to_string(), json!({}));
//! store.insert("dl_template", "2024_01_01_00_00_00_000000", doc)?;
//!
//! let mut fields = Map::new();
//! fields.insert("epoch_results.0".to_string(), json!({"epoch_time": 1.5}));
//! assert!(store.set_fields("dl_template", "2024_01_01_00_00_00_000000", &fields)?);
//! # Ok(())
//! # }
//! ```

mod file;
mod memory;
#[cfg(feature = "mongodb")]
pub(crate) mod mongo;

pub use file::FileDocumentStore;
pub use memory::MemoryDocumentStore;
#[cfg(feature = "mongodb")]
pub use mongo::MongoDocumentStore;

use serde_json::{Map, Value};

use crate::{Error, Result};

/// A JSON object stored under an `_id`.
pub type Document = Map<String, Value>;

/// Name of the primary-key field.
pub const ID_FIELD: &str = "_id";

/// Document collection backend.
///
/// All calls are blocking round trips.
pub trait DocumentStore: Send + Sync {
    /// Insert a new document under `id`.
    ///
    /// The `_id` field is set to `id`, overriding any value in `document`.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateId`] if `id` already exists in `collection`.
    fn insert(&self, collection: &str, id: &str, document: Document) -> Result<()>;

    /// Fetch a document by id.
    ///
    /// # Errors
    ///
    /// Backend failures only; a missing id is `Ok(None)`.
    fn find(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Merge `fields` into the document `id` (`$set`).
    ///
    /// Returns `false` when no document matched, in which case nothing
    /// is written.
    ///
    /// # Errors
    ///
    /// Backend failures and invalid paths (see [`apply_set`]).
    fn set_fields(&self, collection: &str, id: &str, fields: &Document) -> Result<bool>;

    /// All ids in `collection`, ascending.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn ids(&self, collection: &str) -> Result<Vec<String>>;

    /// Highest-ordered id in `collection`.
    ///
    /// # Errors
    ///
    /// Backend failures only.
    fn last_id(&self, collection: &str) -> Result<Option<String>> {
        Ok(self.ids(collection)?.pop())
    }
}

impl<T: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<T> {
    fn insert(&self, collection: &str, id: &str, document: Document) -> Result<()> {
        (**self).insert(collection, id, document)
    }

    fn find(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        (**self).find(collection, id)
    }

    fn set_fields(&self, collection: &str, id: &str, fields: &Document) -> Result<bool> {
        (**self).set_fields(collection, id, fields)
    }

    fn ids(&self, collection: &str) -> Result<Vec<String>> {
        (**self).ids(collection)
    }

    fn last_id(&self, collection: &str) -> Result<Option<String>> {
        (**self).last_id(collection)
    }
}

/// Reject ids that cannot double as file names.
///
/// # Errors
///
/// [`Error::InvalidId`] for empty ids, path separators, `..` and NUL.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty()
        || id == "."
        || id.contains("..")
        || id.contains(['/', '\\', '\0'])
    {
        return Err(Error::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Apply `$set` semantics to `document` in place.
///
/// Each key in `fields` is a path; `a.b.c` walks (and creates) nested
/// objects. Values at the end of a path are replaced wholesale.
///
/// # Errors
///
/// [`Error::StorageError`] when a path is empty, crosses a non-object
/// value, or tries to change `_id`.
pub fn apply_set(document: &mut Document, fields: &Document) -> Result<()> {
    for (path, value) in fields {
        if path == ID_FIELD && document.get(ID_FIELD) != Some(value) {
            return Err(Error::StorageError("'_id' is immutable".to_string()));
        }

        let mut segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(Error::StorageError(format!("invalid field path '{path}'")));
        }
        let Some(leaf) = segments.pop() else {
            continue;
        };

        let mut target = &mut *document;
        for segment in segments {
            let slot = target
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            target = match slot {
                Value::Object(map) => map,
                _ => {
                    return Err(Error::StorageError(format!(
                        "cannot create field in non-object element '{segment}' of '{path}'"
                    )))
                }
            };
        }
        target.insert(leaf.to_string(), value.clone());
    }
    Ok(())
}
