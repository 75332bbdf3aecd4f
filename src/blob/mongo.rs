//! MongoDB chunk backend using the GridFS collection layout.
//!
//! Files written here are readable by any GridFS client when stored
//! uncompressed; compression details live under `metadata`.

use chrono::{TimeZone, Utc};
use mongodb::bson::{doc, spec::BinarySubtype, Binary, Bson, DateTime as BsonDateTime, Document};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::sync::{Client, Collection, Database};
use mongodb::IndexModel;

use super::{ChunkBackend, Compression, FileInfo};
use crate::store::mongo::is_duplicate_key;
use crate::{Error, Result};

/// GridFS `<bucket>.files` / `<bucket>.chunks` collections.
#[derive(Debug, Clone)]
pub struct MongoChunkBackend {
    files: Collection<Document>,
    chunks: Collection<Document>,
}

impl MongoChunkBackend {
    /// Connect and ensure the unique `{files_id, n}` chunk index exists.
    ///
    /// # Errors
    ///
    /// Returns error if the connection string is invalid or the index
    /// cannot be created.
    pub fn connect(connection_string: &str, database: &str, bucket: &str) -> Result<Self> {
        let client = Client::with_uri_str(connection_string)?;
        Self::from_database(&client.database(database), bucket)
    }

    /// Use `bucket` inside an existing database handle.
    ///
    /// # Errors
    ///
    /// Returns error if the chunk index cannot be created.
    pub fn from_database(db: &Database, bucket: &str) -> Result<Self> {
        let files = db.collection::<Document>(&format!("{bucket}.files"));
        let chunks = db.collection::<Document>(&format!("{bucket}.chunks"));
        let index = IndexModel::builder()
            .keys(doc! { "files_id": 1, "n": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        chunks.create_index(index, None)?;
        Ok(Self { files, chunks })
    }
}

fn chunk_number(n: u32) -> Result<i32> {
    i32::try_from(n).map_err(|_| Error::StorageError(format!("chunk index {n} out of range")))
}

fn to_files_document(info: &FileInfo) -> Result<Document> {
    let length = i64::try_from(info.length())
        .map_err(|_| Error::StorageError("blob too large".to_string()))?;
    let raw_length = i64::try_from(info.raw_length())
        .map_err(|_| Error::StorageError("blob too large".to_string()))?;
    let chunk_size = i32::try_from(info.chunk_size())
        .map_err(|_| Error::StorageError("chunk size out of range".to_string()))?;
    Ok(doc! {
        "_id": info.id(),
        "filename": info.filename(),
        "length": length,
        "chunkSize": chunk_size,
        "uploadDate": BsonDateTime::from_millis(info.upload_date().timestamp_millis()),
        "metadata": {
            "compression": info.compression().as_str(),
            "raw_length": raw_length,
        },
    })
}

// Other GridFS writers store small lengths as Int32
fn int_field(document: &Document, key: &str) -> Result<i64> {
    match document.get(key) {
        Some(Bson::Int64(v)) => Ok(*v),
        Some(Bson::Int32(v)) => Ok(i64::from(*v)),
        _ => Err(Error::StorageError(format!(
            "malformed files document: missing integer '{key}'"
        ))),
    }
}

fn from_files_document(document: &Document) -> Result<FileInfo> {
    let bad = |e: mongodb::bson::document::ValueAccessError| {
        Error::StorageError(format!("malformed files document: {e}"))
    };
    let id = document.get_str("_id").map_err(bad)?;
    let filename = document.get_str("filename").unwrap_or(id);
    let length = u64::try_from(int_field(document, "length")?).unwrap_or(0);
    let chunk_size = usize::try_from(int_field(document, "chunkSize")?).unwrap_or(0);
    let upload_millis = document.get_datetime("uploadDate").map_err(bad)?.timestamp_millis();
    let upload_date = Utc
        .timestamp_millis_opt(upload_millis)
        .single()
        .unwrap_or_else(Utc::now);

    let (compression, raw_length) = match document.get_document("metadata") {
        Ok(meta) => (
            meta.get_str("compression")
                .unwrap_or("none")
                .parse::<Compression>()?,
            meta.get_i64("raw_length")
                .ok()
                .and_then(|v| u64::try_from(v).ok())
                .unwrap_or(length),
        ),
        Err(_) => (Compression::None, length),
    };

    Ok(FileInfo::new(id, filename, length, chunk_size)
        .with_compression(compression, raw_length)
        .with_upload_date(upload_date))
}

impl ChunkBackend for MongoChunkBackend {
    fn put_chunk(&self, file_id: &str, n: u32, data: &[u8]) -> Result<()> {
        let n = chunk_number(n)?;
        self.chunks
            .delete_one(doc! { "files_id": file_id, "n": n }, None)?;
        let binary = Binary {
            subtype: BinarySubtype::Generic,
            bytes: data.to_vec(),
        };
        self.chunks
            .insert_one(doc! { "files_id": file_id, "n": n, "data": binary }, None)?;
        Ok(())
    }

    fn chunk(&self, file_id: &str, n: u32) -> Result<Option<Vec<u8>>> {
        let n = chunk_number(n)?;
        let Some(document) = self
            .chunks
            .find_one(doc! { "files_id": file_id, "n": n }, None)?
        else {
            return Ok(None);
        };
        let data = document
            .get_binary_generic("data")
            .map_err(|e| Error::StorageError(format!("malformed chunk document: {e}")))?;
        Ok(Some(data.clone()))
    }

    fn delete_chunks(&self, file_id: &str) -> Result<()> {
        self.chunks.delete_many(doc! { "files_id": file_id }, None)?;
        Ok(())
    }

    fn put_file(&self, info: &FileInfo) -> Result<()> {
        match self.files.insert_one(to_files_document(info)?, None) {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(Error::DuplicateId {
                collection: self.files.name().to_string(),
                id: info.id().to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn file(&self, id: &str) -> Result<Option<FileInfo>> {
        self.files
            .find_one(doc! { "_id": id }, None)?
            .as_ref()
            .map(from_files_document)
            .transpose()
    }

    fn file_ids(&self) -> Result<Vec<String>> {
        let options = FindOptions::builder()
            .projection(doc! { "_id": 1 })
            .sort(doc! { "_id": 1 })
            .build();
        let mut ids = Vec::new();
        for document in self.files.find(doc! {}, options)? {
            if let Ok(id) = document?.get_str("_id") {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    fn latest_file(&self) -> Result<Option<FileInfo>> {
        let options = FindOptions::builder()
            .sort(doc! { "_id": -1 })
            .limit(1)
            .build();
        match self.files.find(doc! {}, options)?.next() {
            Some(document) => from_files_document(&document?).map(Some),
            None => Ok(None),
        }
    }
}
