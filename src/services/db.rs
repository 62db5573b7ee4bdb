use crate::error::AppError;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

/// Persistent key-value store for serialized models.
pub trait ModelCache: Send + Sync {
    fn save(&self, key: &str, blob: &[u8]) -> Result<(), AppError>;
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, AppError>;
    fn contains(&self, key: &str) -> Result<bool, AppError>;
    fn remove(&self, key: &str) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct SqliteModelCache {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteModelCache {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AppError::Cache(format!("Failed to create cache directory {}: {}", parent.display(), e))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, AppError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AppError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS model_cache (
                key TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                saved_at INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        self.conn
            .lock()
            .map_err(|_| AppError::Cache("Cache connection lock poisoned".to_string()))
    }
}

impl ModelCache for SqliteModelCache {
    fn save(&self, key: &str, blob: &[u8]) -> Result<(), AppError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0) as i64;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO model_cache (key, data, saved_at) VALUES (?1, ?2, ?3)",
            params![key, blob, now],
        )?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        let conn = self.conn()?;
        let data = conn
            .query_row(
                "SELECT data FROM model_cache WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data)
    }

    fn contains(&self, key: &str) -> Result<bool, AppError> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM model_cache WHERE key = ?1 LIMIT 1",
                params![key],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM model_cache WHERE key = ?1", params![key])?;
        Ok(())
    }
}
