// Content-addressed cache keys and the cache contract

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Width of a cache key in bytes (BLAKE3 output).
pub const KEY_LEN: usize = 32;

/// Fixed-width digest identifying one cache entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; KEY_LEN]);

impl CacheKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// How a file's cache key is derived.
///
/// `Path` hashes only the file path: edits to the file or to its compile flags
/// still hit the old entry. `Content` also hashes the file content and the
/// flags, so any change produces a miss at the cost of reading the file first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    #[default]
    Path,
    Content,
}

impl KeyStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStrategy::Path => "path",
            KeyStrategy::Content => "content",
        }
    }

    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "path" => Ok(KeyStrategy::Path),
            "content" => Ok(KeyStrategy::Content),
            _ => anyhow::bail!("Unknown key strategy: {}", s),
        }
    }

    /// Derive the key for `path` compiled with `flags`.
    pub fn derive(&self, path: &str, flags: &[String]) -> std::io::Result<CacheKey> {
        match self {
            KeyStrategy::Path => Ok(path_key(path)),
            KeyStrategy::Content => {
                let content = std::fs::read(path)?;
                Ok(content_key(path, &content, flags))
            }
        }
    }
}

/// Key of a file under the `path` strategy.
pub fn path_key(path: &str) -> CacheKey {
    CacheKey(*blake3::hash(path.as_bytes()).as_bytes())
}

/// Key of a file under the `content` strategy.
pub fn content_key(path: &str, content: &[u8], flags: &[String]) -> CacheKey {
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.as_bytes());
    hasher.update(&[0]);
    hasher.update(&(content.len() as u64).to_le_bytes());
    hasher.update(content);
    for flag in flags {
        hasher.update(flag.as_bytes());
        hasher.update(&[0]);
    }
    CacheKey(*hasher.finalize().as_bytes())
}

/// Storage contract the pipeline needs. Implementations must tolerate
/// concurrent calls from independent workers.
pub trait Cache: Send + Sync {
    fn has(&self, key: &CacheKey) -> Result<bool, StoreError>;

    /// Fails with `StoreError::NotFound` when the key is absent.
    fn get(&self, key: &CacheKey) -> Result<Vec<u8>, StoreError>;

    /// `path` is stored alongside the value for inspection only.
    fn put(&self, key: &CacheKey, path: &str, value: &[u8]) -> Result<(), StoreError>;
}
