use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::sync::remote::Collection;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Failed to prepare cache directory: {0}")]
    IoError(#[from] std::io::Error),
}

/// Get/set-by-key byte storage backing the local fallback copy.
pub trait BlobStore: Send {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    fn set(&self, key: &str, data: &[u8]) -> Result<(), CacheError>;
}

pub struct SqliteBlobStore {
    conn: Connection,
}

impl SqliteBlobStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self::new(Connection::open(path)?);
        store.initialize()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        let store = Self::new(Connection::open_in_memory()?);
        store.initialize()?;
        Ok(store)
    }

    pub fn initialize(&self) -> Result<(), CacheError> {
        if self.table_exists("blobs") {
            tracing::debug!("Local blob table already present");
            return Ok(());
        }
        tracing::info!("Creating local blob table");
        self.conn.execute(
            "CREATE TABLE blobs (
                key TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn table_exists(&self, table_name: &str) -> bool {
        let result: SqliteResult<i32> = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        );
        result.unwrap_or(0) > 0
    }
}

impl BlobStore for SqliteBlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let data = self
            .conn
            .query_row("SELECT data FROM blobs WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(data)
    }

    fn set(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO blobs (key, data, updated_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![key, data, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

/// Map-backed blob store. Clones share the same blobs.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(blobs.get(key).cloned())
    }

    fn set(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs.insert(key.to_string(), data.to_vec());
        Ok(())
    }
}

/// Last-known-good copy of each collection, one JSON array per blob.
///
/// Best-effort by contract: encode, decode and storage failures are logged and
/// read back as "no data" instead of being returned.
pub struct LocalCache {
    store: Box<dyn BlobStore>,
}

impl LocalCache {
    pub fn new(store: Box<dyn BlobStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBlobStore::new()))
    }

    pub fn key(collection: Collection) -> &'static str {
        match collection {
            Collection::People => "savedPeople",
            Collection::Events => "savedEvents",
        }
    }

    /// Returns whether the records were written.
    pub fn save<T: Serialize>(&self, collection: Collection, records: &[T]) -> bool {
        let result = serde_json::to_vec(records)
            .map_err(CacheError::from)
            .and_then(|data| self.store.set(Self::key(collection), &data));
        match result {
            Ok(()) => {
                tracing::debug!("Saved {} {} records locally", records.len(), collection);
                true
            }
            Err(e) => {
                tracing::warn!("Failed to save {} locally: {}", collection, e);
                false
            }
        }
    }

    /// `None` when nothing usable is stored; an empty saved collection is `Some(vec![])`.
    pub fn load<T: DeserializeOwned>(&self, collection: Collection) -> Option<Vec<T>> {
        let data = match self.store.get(Self::key(collection)) {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Failed to read local {}: {}", collection, e);
                return None;
            }
        };
        match serde_json::from_slice(&data) {
            Ok(records) => Some(records),
            Err(e) => {
                tracing::warn!("Discarding undecodable local {}: {}", collection, e);
                None
            }
        }
    }
}
