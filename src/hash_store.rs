// src/hash_store.rs

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use rusqlite::params;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
}

/// Key-value record of `full path -> expected hash` for one manifest.
///
/// `get`/`put` work on the in-memory view; `load` and `save` move it
/// to and from the backing storage.
#[async_trait]
pub trait HashStore: Send + Sync {
    fn get(&self, key: &str) -> Option<&str>;

    fn put(&mut self, key: &str, hash: &str);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether anything was saved for this manifest before.
    async fn exists(&self) -> Result<bool, StoreError>;

    async fn load(&mut self) -> Result<(), StoreError>;

    async fn save(&mut self) -> Result<(), StoreError>;
}

/// Store that never outlives the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryHashStore {
    entries: HashMap<String, String>,
    saved: Option<HashMap<String, String>>,
}

impl MemoryHashStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HashStore for MemoryHashStore {
    fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn put(&mut self, key: &str, hash: &str) {
        self.entries.insert(key.to_string(), hash.to_string());
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    async fn exists(&self) -> Result<bool, StoreError> {
        Ok(self.saved.is_some())
    }

    async fn load(&mut self) -> Result<(), StoreError> {
        if let Some(saved) = &self.saved {
            self.entries = saved.clone();
        }
        Ok(())
    }

    async fn save(&mut self) -> Result<(), StoreError> {
        self.saved = Some(self.entries.clone());
        Ok(())
    }
}

/// SQLite file holding the hash records of every manifest.
#[derive(Clone)]
pub struct HashDatabase {
    conn: Connection,
}

impl HashDatabase {
    /// Connects to the database file, creating it and its table if needed.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path).await?;
        let db = Self { conn };
        db.setup_database().await?;
        Ok(db)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let db = Self { conn };
        db.setup_database().await?;
        Ok(db)
    }

    async fn setup_database(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS hashes (
                        manifest        TEXT NOT NULL,
                        path            TEXT NOT NULL,
                        hash            TEXT NOT NULL,
                        PRIMARY KEY (manifest, path)
                    )",
                    [],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Store scoped to the records of `manifest`.
    pub fn store(&self, manifest: &str) -> SqliteHashStore {
        SqliteHashStore {
            conn: self.conn.clone(),
            manifest: manifest.to_string(),
            entries: HashMap::new(),
        }
    }
}

/// [`HashStore`] persisted in a [`HashDatabase`].
pub struct SqliteHashStore {
    conn: Connection,
    manifest: String,
    entries: HashMap<String, String>,
}

#[async_trait]
impl HashStore for SqliteHashStore {
    fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn put(&mut self, key: &str, hash: &str) {
        self.entries.insert(key.to_string(), hash.to_string());
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    async fn exists(&self) -> Result<bool, StoreError> {
        let manifest = self.manifest.clone();
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM hashes WHERE manifest = ?1",
                    params![manifest],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count > 0)
    }

    async fn load(&mut self) -> Result<(), StoreError> {
        let manifest = self.manifest.clone();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT path, hash FROM hashes WHERE manifest = ?1")?;
                let iter = stmt.query_map(params![manifest], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                let mut rows = Vec::new();
                for row in iter {
                    rows.push(row?);
                }
                Ok(rows)
            })
            .await?;
        self.entries.extend(rows);
        Ok(())
    }

    async fn save(&mut self) -> Result<(), StoreError> {
        let manifest = self.manifest.clone();
        let entries: Vec<(String, String)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR REPLACE INTO hashes (manifest, path, hash) VALUES (?1, ?2, ?3)",
                    )?;
                    for (path, hash) in &entries {
                        stmt.execute(params![manifest, path, hash])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
