//! MongoDB document store (blocking driver API).

use mongodb::bson::{self, doc, Bson, Document as BsonDocument};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::FindOptions;
use mongodb::sync::{Client, Database};
use serde_json::Value;

use super::{validate_id, Document, DocumentStore, ID_FIELD};
use crate::{Error, Result};

/// Duplicate key server error code.
const DUPLICATE_KEY: i32 = 11000;

/// Collections of one MongoDB database.
#[derive(Debug, Clone)]
pub struct MongoDocumentStore {
    db: Database,
}

impl MongoDocumentStore {
    /// Connect to `database` using `connection_string`.
    ///
    /// # Errors
    ///
    /// Returns error if the connection string is invalid.
    pub fn connect(connection_string: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(connection_string)?;
        Ok(Self::from_database(client.database(database)))
    }

    /// Wrap an existing database handle.
    #[must_use]
    pub const fn from_database(db: Database) -> Self {
        Self { db }
    }

    fn collection(&self, name: &str) -> mongodb::sync::Collection<BsonDocument> {
        self.db.collection::<BsonDocument>(name)
    }
}

pub(crate) fn to_bson_document(document: &Document) -> Result<BsonDocument> {
    bson::to_document(document).map_err(|e| Error::StorageError(format!("BSON encode: {e}")))
}

pub(crate) fn from_bson_document(document: BsonDocument) -> Result<Document> {
    match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(map) => Ok(map),
        other => Err(Error::StorageError(format!(
            "expected a document, got {other}"
        ))),
    }
}

pub(crate) fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

impl DocumentStore for MongoDocumentStore {
    fn insert(&self, collection: &str, id: &str, document: Document) -> Result<()> {
        validate_id(id)?;
        let mut bson_doc = to_bson_document(&document)?;
        bson_doc.insert(ID_FIELD, id);
        match self.collection(collection).insert_one(bson_doc, None) {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(Error::DuplicateId {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn find(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.collection(collection)
            .find_one(doc! { "_id": id }, None)?
            .map(from_bson_document)
            .transpose()
    }

    fn set_fields(&self, collection: &str, id: &str, fields: &Document) -> Result<bool> {
        if fields.is_empty() {
            return Ok(self.find(collection, id)?.is_some());
        }
        let update = doc! { "$set": to_bson_document(fields)? };
        let result = self
            .collection(collection)
            .update_one(doc! { "_id": id }, update, None)?;
        Ok(result.matched_count > 0)
    }

    fn ids(&self, collection: &str) -> Result<Vec<String>> {
        let options = FindOptions::builder()
            .projection(doc! { "_id": 1 })
            .sort(doc! { "_id": 1 })
            .build();
        let cursor = self.collection(collection).find(doc! {}, options)?;
        let mut ids = Vec::new();
        for document in cursor {
            if let Ok(id) = document?.get_str(ID_FIELD) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    fn last_id(&self, collection: &str) -> Result<Option<String>> {
        let options = FindOptions::builder()
            .projection(doc! { "_id": 1 })
            .sort(doc! { "_id": -1 })
            .limit(1)
            .build();
        let mut cursor = self.collection(collection).find(doc! {}, options)?;
        match cursor.next() {
            Some(document) => Ok(document?.get_str(ID_FIELD).ok().map(str::to_string)),
            None => Ok(None),
        }
    }
}
