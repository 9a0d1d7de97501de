//! libSQL backend — async `RecipientStore` implementation.
//!
//! Supports local file and in-memory databases. Table names carry the
//! configured prefix so the sweeper can share a database with the
//! mailing-list software that owns the subscriber rows.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::StoreError;
use crate::store::{RecipientRecord, RecipientStore};

/// libSQL recipient store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlRecipientStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    prefix: String,
}

impl LibSqlRecipientStore {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn new_local(path: &Path, prefix: &str) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("Failed to create database directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
            prefix: prefix.to_string(),
        };
        store.init_schema().await?;
        info!(path = %path.display(), "Recipient database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory(prefix: &str) -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
            prefix: prefix.to_string(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    fn table(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let subscribers = self.table("subscribers");
        let log = self.table("suppression_log");

        self.conn
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {subscribers} (
                        email TEXT PRIMARY KEY,
                        bounce_count INTEGER NOT NULL DEFAULT 0,
                        suppressed INTEGER NOT NULL DEFAULT 0,
                        created_at TEXT NOT NULL,
                        updated_at TEXT NOT NULL
                    )"
                ),
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("Failed to create {subscribers}: {e}")))?;

        self.conn
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {log} (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        email TEXT NOT NULL,
                        note TEXT,
                        added_at TEXT NOT NULL
                    )"
                ),
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("Failed to create {log}: {e}")))?;

        Ok(())
    }

    /// Insert a subscriber row (seed helper for tests and provisioning).
    pub async fn insert_subscriber(&self, email: &str, bounce_count: i64) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {} (email, bounce_count, suppressed, created_at, updated_at)
                     VALUES (?1, ?2, 0, ?3, ?3)",
                    self.table("subscribers")
                ),
                params![email, bounce_count, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("Insert failed: {e}")))?;
        Ok(())
    }

    /// Read back the suppression notes recorded for one address.
    pub async fn suppression_notes(&self, email: &str) -> Result<Vec<String>, StoreError> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT note FROM {} WHERE email = ?1 ORDER BY id",
                    self.table("suppression_log")
                ),
                params![email],
            )
            .await
            .map_err(|e| StoreError::Query(format!("Note query failed: {e}")))?;

        let mut notes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("Note row failed: {e}")))?
        {
            notes.push(row.get::<String>(0).unwrap_or_default());
        }
        Ok(notes)
    }
}

#[async_trait]
impl RecipientStore for LibSqlRecipientStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<RecipientRecord>, StoreError> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT email, bounce_count, suppressed FROM {} WHERE email = ?1",
                    self.table("subscribers")
                ),
                params![email],
            )
            .await
            .map_err(|e| StoreError::Query(format!("Lookup failed: {e}")))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("Lookup row failed: {e}")))?
        else {
            return Ok(None);
        };

        Ok(Some(RecipientRecord {
            email: row
                .get::<String>(0)
                .map_err(|e| StoreError::Query(e.to_string()))?,
            bounce_count: row
                .get::<i64>(1)
                .map_err(|e| StoreError::Query(e.to_string()))?,
            suppressed: row
                .get::<i64>(2)
                .map_err(|e| StoreError::Query(e.to_string()))?
                != 0,
        }))
    }

    async fn increment_bounce_count(&self, email: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                &format!(
                    "UPDATE {} SET bounce_count = bounce_count + 1, updated_at = ?2
                     WHERE email = ?1",
                    self.table("subscribers")
                ),
                params![email, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("Increment failed: {e}")))?;
        Ok(())
    }

    async fn suppress(&self, email: &str, note: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                &format!(
                    "UPDATE {} SET suppressed = 1, updated_at = ?2 WHERE email = ?1",
                    self.table("subscribers")
                ),
                params![email, now.clone()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("Suppress failed: {e}")))?;

        self.conn
            .execute(
                &format!(
                    "INSERT INTO {} (email, note, added_at) VALUES (?1, ?2, ?3)",
                    self.table("suppression_log")
                ),
                params![email, note, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("Note insert failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn find_missing_recipient_is_none() {
        let store = LibSqlRecipientStore::new_memory("test_").await.unwrap();
        assert!(store.find_by_email("nobody@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn increment_touches_only_the_matched_row() {
        let store = LibSqlRecipientStore::new_memory("test_").await.unwrap();
        store.insert_subscriber("a@x.com", 0).await.unwrap();
        store.insert_subscriber("b@x.com", 5).await.unwrap();

        store.increment_bounce_count("a@x.com").await.unwrap();

        let a = store.find_by_email("a@x.com").await.unwrap().unwrap();
        let b = store.find_by_email("b@x.com").await.unwrap().unwrap();
        assert_eq!(a.bounce_count, 1);
        assert_eq!(b.bounce_count, 5);
    }

    #[tokio::test]
    async fn suppress_sets_flag_and_records_note() {
        let store = LibSqlRecipientStore::new_memory("test_").await.unwrap();
        store.insert_subscriber("a@x.com", 2).await.unwrap();

        store
            .suppress("a@x.com", "Suppressed by bounce importer (550)")
            .await
            .unwrap();

        let rec = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert!(rec.suppressed);
        let notes = store.suppression_notes("a@x.com").await.unwrap();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains("550"));
    }

    #[tokio::test]
    async fn prefix_keeps_tables_apart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let one = LibSqlRecipientStore::new_local(&path, "one_").await.unwrap();
        let two = LibSqlRecipientStore::new_local(&path, "two_").await.unwrap();

        one.insert_subscriber("a@x.com", 0).await.unwrap();
        assert!(two.find_by_email("a@x.com").await.unwrap().is_none());
    }
}
