use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::cache::{Cache, CacheKey, KeyStrategy};
use super::schema::{drop_schema, init_schema};
use crate::error::StoreError;

/// Type alias for connection pool
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Persistent store behind the content-addressed cache.
///
/// Cloning is cheap; clones share one connection pool, so workers can read
/// and write concurrently.
#[derive(Clone)]
pub struct IndexStore {
    pool: ConnectionPool,
    db_path: PathBuf,
}

/// A stored entry, as returned to inspection commands.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub key: String,
    pub path: String,
    pub value: Vec<u8>,
    pub indexed_at: i64,
}

/// Store statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_entries: usize,
    pub total_bytes: u64,
    pub last_indexed: Option<i64>,
}

impl IndexStore {
    /// Create or open a store
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        info!("Opening index store at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.busy_timeout(Duration::from_secs(10))?;
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
        });

        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .context("Failed to create connection pool")?;

        {
            let conn = pool.get().context("Failed to get connection")?;
            init_schema(&conn).context("Failed to initialize schema")?;
        }

        Ok(Self { pool, db_path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, StoreError> {
        Ok(self.pool.get()?)
    }

    /// Most recently written entry for a source path.
    pub fn find_by_path(&self, path: &str) -> Result<Option<StoredEntry>, StoreError> {
        let conn = self.get_conn()?;
        let entry = conn
            .query_row(
                "SELECT key, path, value, indexed_at FROM entries
                 WHERE path = ?1 ORDER BY indexed_at DESC LIMIT 1",
                [path],
                |row| {
                    let key: Vec<u8> = row.get(0)?;
                    Ok(StoredEntry {
                        key: key.iter().map(|b| format!("{:02x}", b)).collect(),
                        path: row.get(1)?,
                        value: row.get(2)?,
                        indexed_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// Get store statistics
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.get_conn()?;

        let (total_entries, total_bytes, last_indexed): (i64, i64, Option<i64>) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0), MAX(indexed_at) FROM entries",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(StoreStats {
            total_entries: total_entries as usize,
            total_bytes: total_bytes as u64,
            last_indexed,
        })
    }

    /// Key strategy the existing entries were written with, if recorded.
    pub fn key_strategy(&self) -> Result<Option<KeyStrategy>, StoreError> {
        let conn = self.get_conn()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM index_meta WHERE key = 'key_strategy'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.and_then(|v| KeyStrategy::from_str(&v).ok()))
    }

    /// Record the key strategy of this run. Switching strategies orphans old entries.
    pub fn set_key_strategy(&self, strategy: KeyStrategy) -> Result<(), StoreError> {
        if let Some(previous) = self.key_strategy()? {
            if previous != strategy {
                warn!(
                    "Store was written with '{}' keys, this run uses '{}'; existing entries will not hit",
                    previous.as_str(),
                    strategy.as_str()
                );
            }
        }

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO index_meta (key, value, updated_at)
             VALUES ('key_strategy', ?1, CURRENT_TIMESTAMP)",
            [strategy.as_str()],
        )?;
        Ok(())
    }

    /// Remove every entry and recreate the schema
    pub fn clear(&self) -> Result<(), StoreError> {
        let conn = self.get_conn()?;
        drop_schema(&conn)?;
        init_schema(&conn)?;
        Ok(())
    }

    /// Close the store. Pooled connections are released once the last clone is gone.
    pub fn close(self) {
        info!("Closing index store at: {}", self.db_path.display());
    }
}

impl Cache for IndexStore {
    fn has(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let conn = self.get_conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM entries WHERE key = ?1",
                [key.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn get(&self, key: &CacheKey) -> Result<Vec<u8>, StoreError> {
        let conn = self.get_conn()?;
        conn.query_row(
            "SELECT value FROM entries WHERE key = ?1",
            [key.as_bytes().as_slice()],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(key.to_hex()))
    }

    fn put(&self, key: &CacheKey, path: &str, value: &[u8]) -> Result<(), StoreError> {
        let conn = self.get_conn()?;

        debug!("Storing {} bytes for {}", value.len(), path);

        conn.execute(
            "INSERT OR REPLACE INTO entries (key, path, value, size, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key.as_bytes().as_slice(),
                path,
                value,
                value.len() as i64,
                chrono::Utc::now().timestamp(),
            ],
        )?;

        Ok(())
    }
}
