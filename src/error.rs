// Error types for each layer of the indexing pipeline

use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by an AST provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("failed to save translation unit: {0}")]
    Save(String),

    #[error("malformed AST file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// Failures while moving a translation unit through a scratch file.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("scratch file error: {0}")]
    Scratch(#[from] std::io::Error),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("serialization task panicked")]
    Panicked,
}

/// Failures while encoding or decoding a file record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("record decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("not a file record (bad magic)")]
    BadMagic,

    #[error("unsupported record version {0}")]
    UnsupportedVersion(u8),
}

/// Failures of the persistent index store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("no cache entry for key {0}")]
    NotFound(String),
}

/// Top-level error of an indexing run or of a single file's pipeline.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Record(#[from] RecordError),
}

impl IndexError {
    pub fn config(message: impl Into<String>) -> Self {
        IndexError::Config(message.into())
    }
}
