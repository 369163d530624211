//! Content hashing for change detection.
//!
//! Files are compared by a 256-bit digest of their full content. The digest
//! is computed by streaming the file through a fixed-size buffer, so large
//! files are never held in memory.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Default read buffer size for hashing (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// A 256-bit content digest. Serialized as lowercase hex.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64 character hex digest.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Output of hashing a file: the digest and the number of bytes read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashedContent {
    pub hash: ContentHash,
    pub size: u64,
}

/// Capability for computing content digests.
///
/// The planner only depends on this trait, so a different digest can be
/// swapped in without touching the classification logic. The algorithm name
/// is persisted alongside the fingerprints.
pub trait ContentHasher: Send + Sync {
    /// Stable name of the digest algorithm, e.g. `"sha256"`.
    fn algorithm(&self) -> &'static str;

    /// Hash everything readable from `reader`.
    fn hash_reader(&self, reader: &mut dyn Read) -> io::Result<HashedContent>;

    /// Hash the file at `path`.
    fn hash_file(&self, path: &Path) -> io::Result<HashedContent> {
        let mut file = File::open(path)?;
        self.hash_reader(&mut file)
    }
}

/// SHA-256 hasher with a configurable read buffer.
#[derive(Debug, Clone)]
pub struct Sha256Hasher {
    chunk_size: usize,
}

impl Sha256Hasher {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Default for Sha256Hasher {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ContentHasher for Sha256Hasher {
    fn algorithm(&self) -> &'static str {
        "sha256"
    }

    fn hash_reader(&self, reader: &mut dyn Read) -> io::Result<HashedContent> {
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; self.chunk_size];
        let mut size = 0u64;

        loop {
            let bytes_read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..bytes_read]);
            size += bytes_read as u64;
        }

        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());

        Ok(HashedContent {
            hash: ContentHash::from_bytes(digest),
            size,
        })
    }
}
