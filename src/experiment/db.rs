//! Experiment database - records in a document store, checkpoints in a blob store

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use super::ExperimentRecord;
use crate::blob::{BlobStore, ChunkBackend, FileChunkBackend, FileInfo, MemoryChunkBackend};
use crate::config::{Endpoint, StoreConfig};
use crate::store::{Document, DocumentStore, FileDocumentStore, MemoryDocumentStore};
use crate::Result;

/// Experiment records and checkpoint blobs behind one connection.
///
/// Regular and sanity-check runs live in separate collections of the same
/// database; checkpoints share one blob bucket keyed by experiment id.
pub struct ExperimentDb {
    config: StoreConfig,
    documents: Arc<dyn DocumentStore>,
    blobs: BlobStore<Arc<dyn ChunkBackend>>,
}

impl fmt::Debug for ExperimentDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentDb")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExperimentDb {
    /// Open the backends named by `config.connection_string`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Config`] for invalid options or a `mongodb://` string in a
    /// build without the `mongodb` feature, plus backend setup failures.
    pub fn connect(config: StoreConfig) -> Result<Self> {
        let (documents, chunks): (Arc<dyn DocumentStore>, Arc<dyn ChunkBackend>) =
            match config.endpoint()? {
                Endpoint::Memory => (
                    Arc::new(MemoryDocumentStore::new()),
                    Arc::new(MemoryChunkBackend::new()),
                ),
                Endpoint::File(root) => (
                    Arc::new(FileDocumentStore::open(&root, &config.database)?),
                    Arc::new(FileChunkBackend::open(
                        &root,
                        &config.database,
                        &config.bucket,
                    )?),
                ),
                Endpoint::Mongo(uri) => Self::mongo_backends(&uri, &config)?,
            };
        info!(
            database = %config.database,
            collection = %config.collection,
            bucket = %config.bucket,
            "experiment database connected"
        );
        Ok(Self::with_backends(config, documents, chunks))
    }

    #[cfg(feature = "mongodb")]
    fn mongo_backends(
        uri: &str,
        config: &StoreConfig,
    ) -> Result<(Arc<dyn DocumentStore>, Arc<dyn ChunkBackend>)> {
        use crate::blob::MongoChunkBackend;
        use crate::store::MongoDocumentStore;

        let client = mongodb::sync::Client::with_uri_str(uri)?;
        let db = client.database(&config.database);
        let chunks = MongoChunkBackend::from_database(&db, &config.bucket)?;
        Ok((
            Arc::new(MongoDocumentStore::from_database(db)),
            Arc::new(chunks),
        ))
    }

    #[cfg(not(feature = "mongodb"))]
    fn mongo_backends(
        _uri: &str,
        _config: &StoreConfig,
    ) -> Result<(Arc<dyn DocumentStore>, Arc<dyn ChunkBackend>)> {
        Err(crate::Error::Config(
            "mongodb:// connection strings need the `mongodb` feature".to_string(),
        ))
    }

    /// Assemble from explicit backends.
    #[must_use]
    pub fn with_backends(
        config: StoreConfig,
        documents: Arc<dyn DocumentStore>,
        chunks: Arc<dyn ChunkBackend>,
    ) -> Self {
        let blobs = BlobStore::new(chunks, config.bucket.clone())
            .with_chunk_size(config.chunk_size)
            .with_compression(config.compression);
        Self {
            config,
            documents,
            blobs,
        }
    }

    /// Fresh in-memory database with default names.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_backends(
            StoreConfig::default(),
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryChunkBackend::new()),
        )
    }

    /// Get the store configuration.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Get the document backend.
    #[must_use]
    pub fn documents(&self) -> &dyn DocumentStore {
        self.documents.as_ref()
    }

    /// Get the checkpoint blob store.
    #[must_use]
    pub const fn blobs(&self) -> &BlobStore<Arc<dyn ChunkBackend>> {
        &self.blobs
    }

    /// Collection for regular or sanity-check runs.
    #[must_use]
    pub fn collection(&self, sanity_check: bool) -> &str {
        self.config.collection_for(sanity_check)
    }

    /// Create the skeleton record for a new run.
    ///
    /// # Errors
    ///
    /// [`crate::Error::DuplicateId`] if the id exists, plus backend failures.
    pub fn setup_experiment_entry(
        &self,
        checkpoint_path: &Path,
        experiment_id: &str,
        sanity_check: bool,
    ) -> Result<()> {
        let record =
            ExperimentRecord::new(experiment_id, checkpoint_path.to_string_lossy().into_owned());
        let collection = self.collection(sanity_check);
        self.documents
            .insert(collection, experiment_id, record.to_document()?)?;
        info!(experiment_id, collection, "experiment record created");
        Ok(())
    }

    /// Merge `fields` into record `experiment_id` (`$set`).
    ///
    /// Returns `false` if no such record exists; nothing is written then.
    ///
    /// # Errors
    ///
    /// Backend failures and invalid field paths.
    pub fn insert_dict(
        &self,
        experiment_id: &str,
        fields: Document,
        sanity_check: bool,
    ) -> Result<bool> {
        let collection = self.collection(sanity_check);
        let matched = self
            .documents
            .set_fields(collection, experiment_id, &fields)?;
        if matched {
            debug!(experiment_id, fields = fields.len(), "experiment record updated");
        } else {
            debug!(experiment_id, collection, "update matched no experiment record");
        }
        Ok(matched)
    }

    /// Merge a single field.
    ///
    /// # Errors
    ///
    /// See [`ExperimentDb::insert_dict`].
    pub fn set_field(
        &self,
        experiment_id: &str,
        key: impl Into<String>,
        value: Value,
        sanity_check: bool,
    ) -> Result<bool> {
        let mut fields = Document::new();
        fields.insert(key.into(), value);
        self.insert_dict(experiment_id, fields, sanity_check)
    }

    /// Raw record document.
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub fn find_document(&self, experiment_id: &str, sanity_check: bool) -> Result<Option<Document>> {
        self.documents
            .find(self.collection(sanity_check), experiment_id)
    }

    /// Typed record.
    ///
    /// # Errors
    ///
    /// Backend failures and documents missing the skeleton fields.
    pub fn find_experiment(
        &self,
        experiment_id: &str,
        sanity_check: bool,
    ) -> Result<Option<ExperimentRecord>> {
        self.find_document(experiment_id, sanity_check)?
            .map(ExperimentRecord::from_document)
            .transpose()
    }

    /// All record ids, ascending.
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub fn experiment_ids(&self, sanity_check: bool) -> Result<Vec<String>> {
        self.documents.ids(self.collection(sanity_check))
    }

    /// Most recent experiment id (highest-ordered).
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub fn last_experiment_id(&self, sanity_check: bool) -> Result<Option<String>> {
        self.documents.last_id(self.collection(sanity_check))
    }

    /// Upload the checkpoint at `checkpoint` under `experiment_id`.
    ///
    /// Skips (returning `Ok(None)`) when the file does not exist.
    ///
    /// # Errors
    ///
    /// [`crate::Error::DuplicateId`] if a checkpoint with this id exists, plus
    /// read and backend failures.
    pub fn save_checkpoint(&self, experiment_id: &str, checkpoint: &Path) -> Result<Option<FileInfo>> {
        self.blobs.put_path(experiment_id, checkpoint)
    }

    /// Download checkpoint `experiment_id` (latest when `None`) into `dest`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::NotFound`] when there is no such checkpoint, plus corrupt
    /// blobs and write failures.
    pub fn load_checkpoint(&self, dest: &Path, experiment_id: Option<&str>) -> Result<FileInfo> {
        self.blobs.download(dest, experiment_id)
    }

    /// Id of the most recently stored checkpoint.
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub fn last_checkpoint_id(&self) -> Result<Option<String>> {
        Ok(self.blobs.latest()?.map(|info| info.id().to_string()))
    }
}
