//! File-system chunk backend.
//!
//! Layout under `<root>/<database>`:
//!
//! ```text
//! <bucket>.files/<id>.json
//! <bucket>.chunks/<id>/000000.bin, 000001.bin, ...
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{ChunkBackend, FileInfo};
use crate::store::validate_id;
use crate::{Error, Result};

/// Directory-backed chunk storage.
#[derive(Debug, Clone)]
pub struct FileChunkBackend {
    files_dir: PathBuf,
    chunks_dir: PathBuf,
}

impl FileChunkBackend {
    /// Open (and create) the bucket directories under `<root>/<database>`.
    ///
    /// # Errors
    ///
    /// Returns error if the directories cannot be created.
    pub fn open(root: impl AsRef<Path>, database: &str, bucket: &str) -> Result<Self> {
        validate_id(database)?;
        validate_id(bucket)?;
        let base = root.as_ref().join(database);
        let files_dir = base.join(format!("{bucket}.files"));
        let chunks_dir = base.join(format!("{bucket}.chunks"));
        fs::create_dir_all(&files_dir)?;
        fs::create_dir_all(&chunks_dir)?;
        Ok(Self {
            files_dir,
            chunks_dir,
        })
    }

    fn file_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.files_dir.join(format!("{id}.json")))
    }

    fn chunk_dir(&self, file_id: &str) -> Result<PathBuf> {
        validate_id(file_id)?;
        Ok(self.chunks_dir.join(file_id))
    }

    fn chunk_path(&self, file_id: &str, n: u32) -> Result<PathBuf> {
        Ok(self.chunk_dir(file_id)?.join(format!("{n:06}.bin")))
    }
}

impl ChunkBackend for FileChunkBackend {
    fn put_chunk(&self, file_id: &str, n: u32, data: &[u8]) -> Result<()> {
        fs::create_dir_all(self.chunk_dir(file_id)?)?;
        fs::write(self.chunk_path(file_id, n)?, data)?;
        Ok(())
    }

    fn chunk(&self, file_id: &str, n: u32) -> Result<Option<Vec<u8>>> {
        match fs::read(self.chunk_path(file_id, n)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_chunks(&self, file_id: &str) -> Result<()> {
        match fs::remove_dir_all(self.chunk_dir(file_id)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn put_file(&self, info: &FileInfo) -> Result<()> {
        let path = self.file_path(info.id())?;
        if path.exists() {
            return Err(Error::DuplicateId {
                collection: self.files_dir.display().to_string(),
                id: info.id().to_string(),
            });
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(info)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn file(&self, id: &str) -> Result<Option<FileInfo>> {
        match fs::read(self.file_path(id)?) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn file_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.files_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
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
