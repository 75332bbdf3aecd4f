//! File-system document store.
//!
//! Layout: `<root>/<database>/<collection>/<id>.json`. Writes go to a
//! temporary sibling and are renamed into place.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::{apply_set, validate_id, Document, DocumentStore, ID_FIELD};
use crate::{Error, Result};

const EXTENSION: &str = "json";

/// Directory-backed document store.
#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    root: PathBuf,
}

impl FileDocumentStore {
    /// Open (and create) `<root>/<database>`.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created.
    pub fn open(root: impl AsRef<Path>, database: &str) -> Result<Self> {
        validate_id(database)?;
        let root = root.as_ref().join(database);
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Database directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf> {
        validate_id(collection)?;
        Ok(self.root.join(collection))
    }

    fn document_path(&self, collection: &str, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self
            .collection_dir(collection)?
            .join(format!("{id}.{EXTENSION}")))
    }

    fn read(path: &Path) -> Result<Option<Document>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(path: &Path, document: &Document) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(document)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl DocumentStore for FileDocumentStore {
    fn insert(&self, collection: &str, id: &str, mut document: Document) -> Result<()> {
        let path = self.document_path(collection, id)?;
        if path.exists() {
            return Err(Error::DuplicateId {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        Self::write(&path, &document)
    }

    fn find(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        Self::read(&self.document_path(collection, id)?)
    }

    fn set_fields(&self, collection: &str, id: &str, fields: &Document) -> Result<bool> {
        let path = self.document_path(collection, id)?;
        let Some(mut document) = Self::read(&path)? else {
            return Ok(false);
        };
        apply_set(&mut document, fields)?;
        Self::write(&path, &document)?;
        Ok(true)
    }

    fn ids(&self, collection: &str) -> Result<Vec<String>> {
        let dir = self.collection_dir(collection)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_layout() {
        let dir = TempDir::new().unwrap();
        let store = FileDocumentStore::open(dir.path(), "acc").unwrap();
        store.insert("dl_template", "run-1", Document::new()).unwrap();

        let path = dir.path().join("acc").join("dl_template").join("run-1.json");
        assert!(path.exists());
        let raw: Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        assert_eq!(raw["_id"], json!("run-1"));
    }

    #[test]
    fn test_file_store_set_and_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileDocumentStore::open(dir.path(), "acc").unwrap();
            let mut doc = Document::new();
            doc.insert("a".to_string(), json!(1));
            store.insert("c", "run-1", doc).unwrap();

            let mut fields = Document::new();
            fields.insert("b".to_string(), json!("two"));
            assert!(store.set_fields("c", "run-1", &fields).unwrap());
        }

        let store = FileDocumentStore::open(dir.path(), "acc").unwrap();
        let doc = store.find("c", "run-1").unwrap().unwrap();
        assert_eq!(doc["a"], json!(1));
        assert_eq!(doc["b"], json!("two"));
    }

    #[test]
    fn test_file_store_missing() {
        let dir = TempDir::new().unwrap();
        let store = FileDocumentStore::open(dir.path(), "acc").unwrap();
        assert!(store.find("c", "x").unwrap().is_none());
        assert!(!store.set_fields("c", "x", &Document::new()).unwrap());
        assert!(store.ids("c").unwrap().is_empty());
    }

    #[test]
    fn test_file_store_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FileDocumentStore::open(dir.path(), "acc").unwrap();
        assert!(matches!(
            store.insert("c", "../escape", Document::new()),
            Err(Error::InvalidId(_))
        ));
        assert!(matches!(
            store.insert("../c", "id", Document::new()),
            Err(Error::InvalidId(_))
        ));
    }

    #[test]
    fn test_file_store_ids_ignore_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = FileDocumentStore::open(dir.path(), "acc").unwrap();
        store.insert("c", "b", Document::new()).unwrap();
        store.insert("c", "a", Document::new()).unwrap();
        fs::write(store.root().join("c").join("z.json.tmp"), b"{}").unwrap();
        assert_eq!(store.ids("c").unwrap(), vec!["a", "b"]);
    }
}
