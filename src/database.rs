use crate::error::{HarvestError, Result};
use crate::model::Item;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::sync::{Mutex, MutexGuard};

/// Durable store of reviews keyed by (text, author, collection_id)
pub trait ReviewStore {
    /// Whether a review with this natural key is already stored
    fn exists(&self, text: &str, author: &str, collection_id: &str) -> Result<bool>;

    /// Insert a review; returns false when the natural key was already present
    fn insert(&self, item: &Item) -> Result<bool>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open a SQLite review database
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(classify)?;
        Self::with_connection(conn)
    }

    /// Open a throwaway database that lives only as long as the store
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = SqliteStore {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS reviews (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                review_text TEXT NOT NULL,
                rating REAL,
                author_name TEXT NOT NULL,
                review_source TEXT NOT NULL,
                collection_id TEXT NOT NULL,
                harvested_at TEXT DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(review_text, author_name, collection_id)
            )",
            [],
        )
        .map_err(classify)?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_reviews_collection ON reviews(collection_id)",
            [],
        )
        .map_err(classify)?;

        Ok(())
    }

    /// Close the connection, surfacing any error the implicit drop would swallow
    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|_| HarvestError::StorageUnavailable("connection lock poisoned".to_string()))?;
        conn.close().map_err(|(_, e)| classify(e))
    }

    /// Get total count of stored reviews
    pub fn review_count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: u64 = conn
            .query_row("SELECT COUNT(*) FROM reviews", [], |row| row.get(0))
            .map_err(classify)?;
        Ok(count)
    }

    /// Get count of distinct collections with at least one review
    pub fn collection_count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: u64 = conn
            .query_row(
                "SELECT COUNT(DISTINCT collection_id) FROM reviews",
                [],
                |row| row.get(0),
            )
            .map_err(classify)?;
        Ok(count)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| HarvestError::StorageUnavailable("connection lock poisoned".to_string()))
    }
}

impl ReviewStore for SqliteStore {
    fn exists(&self, text: &str, author: &str, collection_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM reviews
                 WHERE review_text = ?1 AND author_name = ?2 AND collection_id = ?3
                 LIMIT 1",
                params![text, author, collection_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(classify)?;
        Ok(found.is_some())
    }

    fn insert(&self, item: &Item) -> Result<bool> {
        let conn = self.lock()?;
        let result = conn
            .execute(
                "INSERT OR IGNORE INTO reviews
                    (review_text, rating, author_name, review_source, collection_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    item.text,
                    item.rating,
                    item.author,
                    item.source_tag,
                    item.collection_id
                ],
            )
            .map_err(classify)?;
        Ok(result > 0)
    }
}

/// Map connectivity-class SQLite failures to `StorageUnavailable`
fn classify(err: rusqlite::Error) -> HarvestError {
    match err.sqlite_error_code() {
        Some(
            ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::ReadOnly
            | ErrorCode::DiskFull
            | ErrorCode::PermissionDenied,
        ) => HarvestError::StorageUnavailable(err.to_string()),
        _ => HarvestError::Storage(err),
    }
}
