//! Store configuration
//!
//! The connection string is never hard-coded: it comes from the
//! `MONGODB_CONNECTION_STR` environment variable or the command line.
//! Its scheme selects the backend:
//!
//! | Scheme                          | Backend                             |
//! |---------------------------------|-------------------------------------|
//! | `memory://`                     | process-local `DashMap` collections |
//! | `file://<dir>`                  | one JSON file per document          |
//! | `mongodb://`, `mongodb+srv://`  | MongoDB (feature `mongodb`)         |

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::blob::Compression;
use crate::{Error, Result};

/// Environment variable holding the connection string.
pub const CONNECTION_ENV: &str = "MONGODB_CONNECTION_STR";

/// GridFS default chunk size (255 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

/// Resolved storage endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// In-process maps, lost on exit.
    Memory,
    /// Directory tree on the local file system.
    File(PathBuf),
    /// MongoDB deployment (the full connection string).
    Mongo(String),
}

impl Endpoint {
    /// Parse a connection string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for empty strings and unknown schemes.
    pub fn parse(connection_string: &str) -> Result<Self> {
        let s = connection_string.trim();
        if s.is_empty() {
            return Err(Error::Config(format!(
                "empty connection string (set {CONNECTION_ENV} or pass --store)"
            )));
        }
        if s == "memory" || s.starts_with("memory://") {
            return Ok(Self::Memory);
        }
        if let Some(path) = s.strip_prefix("file://") {
            if path.is_empty() {
                return Err(Error::Config("file:// needs a directory".to_string()));
            }
            return Ok(Self::File(PathBuf::from(path)));
        }
        if s.starts_with("mongodb://") || s.starts_with("mongodb+srv://") {
            return Ok(Self::Mongo(s.to_string()));
        }
        Err(Error::Config(format!("unsupported connection string scheme: {s}")))
    }
}

/// Where and how experiment records and checkpoints are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Connection string (see module docs for schemes)
    pub connection_string: String,
    /// Database holding both collections and the blob bucket
    pub database: String,
    /// Collection for regular runs
    pub collection: String,
    /// Collection for sanity-check runs
    pub sanity_collection: String,
    /// Blob bucket prefix (`<bucket>.files`, `<bucket>.chunks`)
    pub bucket: String,
    /// Blob chunk size in bytes
    pub chunk_size: usize,
    /// Compression applied to uploaded checkpoints
    pub compression: Compression,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connection_string: "memory://".to_string(),
            database: "acc".to_string(),
            collection: "dl_template".to_string(),
            sanity_collection: "dl_template_sanity_checks".to_string(),
            bucket: "fs".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: Compression::None,
        }
    }
}

impl StoreConfig {
    /// Default configuration pointing at `connection_string`.
    #[must_use]
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Self::default()
        }
    }

    /// Build from `MONGODB_CONNECTION_STR`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the variable is unset or empty.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONNECTION_ENV) {
            Ok(s) if !s.trim().is_empty() => Ok(Self::new(s)),
            _ => Err(Error::Config(format!("{CONNECTION_ENV} is not set"))),
        }
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the blob chunk size.
    #[must_use]
    pub const fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set checkpoint compression.
    #[must_use]
    pub const fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Collection name for a run, by sanity-check flag.
    #[must_use]
    pub fn collection_for(&self, sanity_check: bool) -> &str {
        if sanity_check {
            &self.sanity_collection
        } else {
            &self.collection
        }
    }

    /// Parse and validate the connection string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for bad schemes, a zero chunk size or
    /// identical normal/sanity collections.
    pub fn endpoint(&self) -> Result<Endpoint> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".to_string()));
        }
        if self.collection == self.sanity_collection {
            return Err(Error::Config(format!(
                "sanity-check collection must differ from '{}'",
                self.collection
            )));
        }
        Endpoint::parse(&self.connection_string)
    }
}
