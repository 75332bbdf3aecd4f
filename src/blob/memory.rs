//! In-memory chunk backend using `DashMap`.
//!
//! This is the default backend for tests - data is lost on process restart.

use dashmap::DashMap;

use super::{ChunkBackend, FileInfo};
use crate::{Error, Result};

/// In-memory file documents and chunks.
#[derive(Debug, Default)]
pub struct MemoryChunkBackend {
    files: DashMap<String, FileInfo>,
    chunks: DashMap<(String, u32), Vec<u8>>,
}

impl MemoryChunkBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored chunks across all files.
    #[must_use]
    pub fn chunk_total(&self) -> usize {
        self.chunks.len()
    }
}

impl ChunkBackend for MemoryChunkBackend {
    fn put_chunk(&self, file_id: &str, n: u32, data: &[u8]) -> Result<()> {
        self.chunks.insert((file_id.to_string(), n), data.to_vec());
        Ok(())
    }

    fn chunk(&self, file_id: &str, n: u32) -> Result<Option<Vec<u8>>> {
        Ok(self
            .chunks
            .get(&(file_id.to_string(), n))
            .map(|c| c.value().clone()))
    }

    fn delete_chunks(&self, file_id: &str) -> Result<()> {
        self.chunks.retain(|(id, _), _| id != file_id);
        Ok(())
    }

    fn put_file(&self, info: &FileInfo) -> Result<()> {
        match self.files.entry(info.id().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::DuplicateId {
                collection: "files".to_string(),
                id: info.id().to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(info.clone());
                Ok(())
            }
        }
    }

    fn file(&self, id: &str) -> Result<Option<FileInfo>> {
        Ok(self.files.get(id).map(|f| f.value().clone()))
    }

    fn file_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.files.iter().map(|f| f.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}
