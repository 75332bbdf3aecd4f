//! Whole-blob compression for checkpoints
//!
//! LZ4 and ZSTD are available with the `compression` feature. The choice is
//! recorded per blob, so a store can hold a mix and reads undo whatever the
//! writer applied.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Compression algorithm for blob payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Stored as-is (default)
    #[default]
    None,
    /// LZ4 - Fast compression
    #[cfg(feature = "compression")]
    Lz4,
    /// ZSTD - Better ratio, slower
    #[cfg(feature = "compression")]
    Zstd,
}

impl Compression {
    /// Get algorithm name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            #[cfg(feature = "compression")]
            Self::Lz4 => "lz4",
            #[cfg(feature = "compression")]
            Self::Zstd => "zstd",
        }
    }

    /// Compress data using this algorithm
    ///
    /// # Errors
    /// Returns error if compression fails (e.g., ZSTD internal error)
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::None => Ok(data.to_vec()),
            #[cfg(feature = "compression")]
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            #[cfg(feature = "compression")]
            Self::Zstd => zstd::encode_all(data, 3)
                .map_err(|e| Error::StorageError(format!("ZSTD compression failed: {e}"))),
        }
    }

    /// Decompress data using this algorithm
    ///
    /// # Errors
    /// Returns error if decompression fails (e.g., corrupted data)
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::None => Ok(data.to_vec()),
            #[cfg(feature = "compression")]
            Self::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| Error::StorageError(format!("LZ4 decompression failed: {e}"))),
            #[cfg(feature = "compression")]
            Self::Zstd => zstd::decode_all(data)
                .map_err(|e| Error::StorageError(format!("ZSTD decompression failed: {e}"))),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            #[cfg(feature = "compression")]
            "lz4" => Ok(Self::Lz4),
            #[cfg(feature = "compression")]
            "zstd" => Ok(Self::Zstd),
            other => Err(Error::Config(format!(
                "unsupported compression '{other}' (build with the `compression` feature for lz4/zstd)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_default() {
        assert_eq!(Compression::default(), Compression::None);
        assert_eq!(Compression::None.as_str(), "none");
    }

    #[test]
    fn test_none_is_identity() {
        let data = b"checkpoint bytes".to_vec();
        let stored = Compression::None.compress(&data).unwrap();
        assert_eq!(stored, data);
        assert_eq!(Compression::None.decompress(&stored).unwrap(), data);
    }

    #[test]
    fn test_from_str() {
        assert_eq!("none".parse::<Compression>().unwrap(), Compression::None);
        assert_eq!("NONE".parse::<Compression>().unwrap(), Compression::None);
        assert!("brotli".parse::<Compression>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Compression::None).unwrap();
        assert_eq!(json, "\"none\"");
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_lz4_compress_decompress() {
        let data = b"hello world hello world hello world".to_vec();
        let compressed = Compression::Lz4.compress(&data).unwrap();
        let decompressed = Compression::Lz4.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_zstd_compresses_repeated_data() {
        let data = vec![0u8; 10000];
        let compressed = Compression::Zstd.compress(&data).unwrap();
        // ZSTD should achieve >10x compression on zeros
        assert!(compressed.len() < data.len() / 10);
        assert_eq!(Compression::Zstd.decompress(&compressed).unwrap(), data);
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_empty_data_compression() {
        for algo in [Compression::Lz4, Compression::Zstd] {
            let compressed = algo.compress(&[]).unwrap();
            assert!(compressed.is_empty());
            assert!(algo.decompress(&compressed).unwrap().is_empty());
        }
    }
}
