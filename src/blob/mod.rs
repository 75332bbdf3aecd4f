//! Chunked Blob Store (GridFS layout)
//!
//! Large files are split into fixed-size chunks. A blob is visible only
//! once its file document exists, and the file document is written after
//! every chunk.
//!
//! ```text
//! <bucket>.files   { _id, filename, length, chunkSize, uploadDate, metadata }
//!                        │
//! <bucket>.chunks  { files_id, n, data }  n = 0 .. ceil(length / chunkSize)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use dl_tracker::blob::{BlobStore, MemoryChunkBackend};
//!
//! # fn main() -> dl_tracker::Result<()> {
//! let blobs = BlobStore::new(MemoryChunkBackend::new(), "fs").with_chunk_size(4);
//! blobs.put_bytes("2024_01_01_00_00_00_000000", "best.ckpt", b"model state")?;
//!
//! let (info, bytes) = blobs.get_bytes("2024_01_01_00_00_00_000000")?;
//! assert_eq!(bytes, b"model state");
//! assert_eq!(info.chunk_count(), 3);
//! # Ok(())
//! # }
//! ```

mod compression;
mod file;
mod memory;
#[cfg(feature = "mongodb")]
mod mongo;

pub use compression::Compression;
pub use file::FileChunkBackend;
pub use memory::MemoryChunkBackend;
#[cfg(feature = "mongodb")]
pub use mongo::MongoChunkBackend;

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::store::validate_id;
use crate::{Error, Result};

/// Metadata document describing one stored blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileInfo {
    id: String,
    filename: String,
    length: u64,
    chunk_size: usize,
    upload_date: DateTime<Utc>,
    compression: Compression,
    raw_length: u64,
}

impl FileInfo {
    /// Create a file document for a blob uploaded now.
    ///
    /// # Arguments
    ///
    /// * `id` - Blob id (the experiment id for checkpoints)
    /// * `filename` - Original file name
    /// * `length` - Stored (possibly compressed) size in bytes
    /// * `chunk_size` - Chunk size used for the upload
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        filename: impl Into<String>,
        length: u64,
        chunk_size: usize,
    ) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            length,
            chunk_size,
            upload_date: Utc::now(),
            compression: Compression::None,
            raw_length: length,
        }
    }

    /// Record the compression applied and the uncompressed size.
    #[must_use]
    pub const fn with_compression(mut self, compression: Compression, raw_length: u64) -> Self {
        self.compression = compression;
        self.raw_length = raw_length;
        self
    }

    /// Set a custom upload timestamp (useful for deserialization/testing).
    #[must_use]
    pub const fn with_upload_date(mut self, upload_date: DateTime<Utc>) -> Self {
        self.upload_date = upload_date;
        self
    }

    /// Get the blob id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the original file name.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Get the stored size in bytes.
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// Get the chunk size.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Get the upload timestamp.
    #[must_use]
    pub const fn upload_date(&self) -> DateTime<Utc> {
        self.upload_date
    }

    /// Get the compression algorithm.
    #[must_use]
    pub const fn compression(&self) -> Compression {
        self.compression
    }

    /// Get the size before compression.
    #[must_use]
    pub const fn raw_length(&self) -> u64 {
        self.raw_length
    }

    /// Number of chunks the stored bytes occupy.
    #[must_use]
    pub fn chunk_count(&self) -> u32 {
        if self.chunk_size == 0 {
            return 0;
        }
        let count = self.length.div_ceil(self.chunk_size as u64);
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Expected byte length of chunk `n`.
    #[must_use]
    pub fn expected_chunk_len(&self, n: u32) -> usize {
        let count = self.chunk_count();
        if n + 1 < count {
            return self.chunk_size;
        }
        let full = u64::from(count.saturating_sub(1)) * self.chunk_size as u64;
        usize::try_from(self.length - full).unwrap_or(usize::MAX)
    }
}

/// Raw chunk and file-document persistence under one bucket.
///
/// Implementations do no chunking themselves; [`BlobStore`] drives them.
pub trait ChunkBackend: Send + Sync {
    /// Store chunk `n` of `file_id`, replacing any previous chunk `n`.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn put_chunk(&self, file_id: &str, n: u32, data: &[u8]) -> Result<()>;

    /// Load chunk `n` of `file_id`.
    ///
    /// # Errors
    ///
    /// Backend failures; a missing chunk is `Ok(None)`.
    fn chunk(&self, file_id: &str, n: u32) -> Result<Option<Vec<u8>>>;

    /// Remove every chunk of `file_id`.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn delete_chunks(&self, file_id: &str) -> Result<()>;

    /// Insert the file document, making the blob visible.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateId`] if the id is taken.
    fn put_file(&self, info: &FileInfo) -> Result<()>;

    /// Load a file document.
    ///
    /// # Errors
    ///
    /// Backend failures; a missing id is `Ok(None)`.
    fn file(&self, id: &str) -> Result<Option<FileInfo>>;

    /// All file ids, ascending.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn file_ids(&self) -> Result<Vec<String>>;

    /// File document with the highest-ordered id.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn latest_file(&self) -> Result<Option<FileInfo>> {
        match self.file_ids()?.pop() {
            Some(id) => self.file(&id),
            None => Ok(None),
        }
    }
}

impl<T: ChunkBackend + ?Sized> ChunkBackend for std::sync::Arc<T> {
    fn put_chunk(&self, file_id: &str, n: u32, data: &[u8]) -> Result<()> {
        (**self).put_chunk(file_id, n, data)
    }

    fn chunk(&self, file_id: &str, n: u32) -> Result<Option<Vec<u8>>> {
        (**self).chunk(file_id, n)
    }

    fn delete_chunks(&self, file_id: &str) -> Result<()> {
        (**self).delete_chunks(file_id)
    }

    fn put_file(&self, info: &FileInfo) -> Result<()> {
        (**self).put_file(info)
    }

    fn file(&self, id: &str) -> Result<Option<FileInfo>> {
        (**self).file(id)
    }

    fn file_ids(&self) -> Result<Vec<String>> {
        (**self).file_ids()
    }

    fn latest_file(&self) -> Result<Option<FileInfo>> {
        (**self).latest_file()
    }
}

/// Chunking front end over a [`ChunkBackend`].
#[derive(Debug)]
pub struct BlobStore<B: ChunkBackend> {
    backend: B,
    bucket: String,
    chunk_size: usize,
    compression: Compression,
}

impl<B: ChunkBackend> BlobStore<B> {
    /// Create a blob store with the GridFS default chunk size.
    #[must_use]
    pub fn new(backend: B, bucket: impl Into<String>) -> Self {
        Self {
            backend,
            bucket: bucket.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: Compression::None,
        }
    }

    /// Override the chunk size (values below 1 are clamped to 1).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Compress payloads on upload.
    #[must_use]
    pub const fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Get reference to the backend (for inspection/testing)
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Get the chunk size.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn files_collection(&self) -> String {
        format!("{}.files", self.bucket)
    }

    /// Upload `bytes` as blob `id`.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateId`] if `id` exists, [`Error::InvalidId`] for unusable
    /// ids, and backend failures. A failed upload leaves no chunks behind.
    pub fn put_bytes(&self, id: &str, filename: &str, bytes: &[u8]) -> Result<FileInfo> {
        validate_id(id)?;
        if self.backend.file(id)?.is_some() {
            return Err(Error::DuplicateId {
                collection: self.files_collection(),
                id: id.to_string(),
            });
        }

        let stored = self.compression.compress(bytes)?;
        let info = FileInfo::new(id, filename, stored.len() as u64, self.chunk_size)
            .with_compression(self.compression, bytes.len() as u64);

        // Orphans from an earlier aborted upload would otherwise mix in
        self.backend.delete_chunks(id)?;

        let written = stored
            .chunks(self.chunk_size)
            .zip(0u32..)
            .try_for_each(|(chunk, n)| self.backend.put_chunk(id, n, chunk))
            .and_then(|()| self.backend.put_file(&info));

        if let Err(e) = written {
            warn!(id, error = %e, "blob upload failed, removing chunks");
            self.backend.delete_chunks(id)?;
            return Err(e);
        }

        debug!(
            id,
            length = info.length(),
            chunks = info.chunk_count(),
            compression = %info.compression(),
            "stored blob"
        );
        Ok(info)
    }

    /// Upload the file at `path` as blob `id`, if that file exists.
    ///
    /// Returns `Ok(None)` (with a warning) when there is nothing to upload.
    ///
    /// # Errors
    ///
    /// Read failures and everything [`BlobStore::put_bytes`] returns.
    pub fn put_path(&self, id: &str, path: &Path) -> Result<Option<FileInfo>> {
        if !path.is_file() {
            warn!(id, path = %path.display(), "checkpoint file missing, nothing uploaded");
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        let filename = path
            .file_name()
            .map_or_else(|| id.to_string(), |n| n.to_string_lossy().into_owned());
        let info = self.put_bytes(id, &filename, &bytes)?;
        info!(id, path = %path.display(), bytes = bytes.len(), "checkpoint uploaded");
        Ok(Some(info))
    }

    /// File document for `id`.
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub fn info(&self, id: &str) -> Result<Option<FileInfo>> {
        self.backend.file(id)
    }

    /// Most recently stored blob (highest-ordered id).
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub fn latest(&self) -> Result<Option<FileInfo>> {
        self.backend.latest_file()
    }

    /// All blob ids, ascending.
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub fn ids(&self) -> Result<Vec<String>> {
        self.backend.file_ids()
    }

    /// Read blob `id` back into memory.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown ids, [`Error::CorruptBlob`] for missing
    /// or mis-sized chunks, and decompression failures.
    pub fn get_bytes(&self, id: &str) -> Result<(FileInfo, Vec<u8>)> {
        let info = self.backend.file(id)?.ok_or_else(|| Error::NotFound {
            collection: self.files_collection(),
            id: id.to_string(),
        })?;

        let capacity = usize::try_from(info.length()).unwrap_or(0);
        let mut stored = Vec::with_capacity(capacity);
        for n in 0..info.chunk_count() {
            let chunk = self.backend.chunk(id, n)?.ok_or_else(|| Error::CorruptBlob {
                id: id.to_string(),
                reason: format!("chunk {n} of {} missing", info.chunk_count()),
            })?;
            let expected = info.expected_chunk_len(n);
            if chunk.len() != expected {
                return Err(Error::CorruptBlob {
                    id: id.to_string(),
                    reason: format!("chunk {n} has {} bytes, expected {expected}", chunk.len()),
                });
            }
            stored.extend_from_slice(&chunk);
        }

        let bytes = info.compression().decompress(&stored)?;
        if bytes.len() as u64 != info.raw_length() {
            return Err(Error::CorruptBlob {
                id: id.to_string(),
                reason: format!(
                    "decoded {} bytes, expected {}",
                    bytes.len(),
                    info.raw_length()
                ),
            });
        }
        Ok((info, bytes))
    }

    /// Write blob `id` (or the most recent blob when `id` is `None`) to `dest`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the store is empty or `id` is unknown, plus
    /// everything [`BlobStore::get_bytes`] returns and write failures.
    pub fn download(&self, dest: &Path, id: Option<&str>) -> Result<FileInfo> {
        let id = match id {
            Some(id) => id.to_string(),
            None => self
                .latest()?
                .map(|info| info.id().to_string())
                .ok_or_else(|| Error::NotFound {
                    collection: self.files_collection(),
                    id: "<latest>".to_string(),
                })?,
        };

        let (info, bytes) = self.get_bytes(&id)?;
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(dest, &bytes)?;
        info!(id = %id, dest = %dest.display(), bytes = bytes.len(), "checkpoint downloaded");
        Ok(info)
    }
}
