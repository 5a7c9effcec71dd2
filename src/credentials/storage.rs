//! Credential persistence using SQLite.
//!
//! Stores one ciphertext blob per (user, platform). The store never sees
//! plaintext; encryption happens in the lifecycle manager before `upsert`.

use super::{CredentialRecord, IntegrationSummary};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Keyed record API the vault needs from a relational store.
///
/// Every read and delete is scoped by the caller's `user_id`; implementations
/// must never return or remove another user's record.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Inserts or replaces the blob for `(user_id, platform)` in one atomic write.
    ///
    /// A second call with the same key keeps the record id and `created_at`,
    /// replaces `ciphertext_blob`, and bumps `updated_at`.
    async fn upsert(
        &self,
        user_id: &str,
        platform: &str,
        ciphertext_blob: &str,
    ) -> Result<CredentialRecord, StoreError>;

    async fn get(&self, user_id: &str, platform: &str)
        -> Result<Option<CredentialRecord>, StoreError>;

    /// Metadata for all of a user's records, ordered by platform.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<IntegrationSummary>, StoreError>;

    /// Deletes the record with `id` if it belongs to `user_id`.
    ///
    /// Returns `false` both when the id does not exist and when it belongs to
    /// someone else.
    async fn delete_by_id(&self, id: &str, user_id: &str) -> Result<bool, StoreError>;

    /// Deletes the user's record(s) for `platform`, returning how many were removed.
    async fn delete_by_platform(&self, user_id: &str, platform: &str)
        -> Result<usize, StoreError>;

    /// Every (user_id, platform) pair in the store, for maintenance sweeps.
    async fn list_all(&self) -> Result<Vec<(String, String)>, StoreError>;
}

/// Credential store backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE user_integrations (
///     id TEXT PRIMARY KEY,              -- UUID v7
///     user_id TEXT NOT NULL,
///     platform TEXT NOT NULL,
///     ciphertext_blob TEXT NOT NULL,    -- salt:nonce:tag:ciphertext
///     created_at TEXT NOT NULL,         -- RFC 3339
///     updated_at TEXT NOT NULL,         -- RFC 3339
///     UNIQUE(user_id, platform)
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in a Mutex and only touched from blocking tasks
/// - Upsert runs `INSERT .. ON CONFLICT DO UPDATE` and the read-back in one transaction
#[derive(Clone)]
pub struct SqliteCredentialStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCredentialStore {
    /// Creates or opens a credential store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`":memory:"` for tests)
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS user_integrations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                ciphertext_blob TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, platform)
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_user_integrations_user ON user_integrations(user_id)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

const RECORD_COLUMNS: &str = "id, user_id, platform, ciphertext_blob, created_at, updated_at";

/// Row as stored, before timestamp parsing
struct RawRecord {
    id: String,
    user_id: String,
    platform: String,
    ciphertext_blob: String,
    created_at: String,
    updated_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            platform: row.get(2)?,
            ciphertext_blob: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<CredentialRecord, StoreError> {
        Ok(CredentialRecord {
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            id: self.id,
            user_id: self.user_id,
            platform: self.platform,
            ciphertext_blob: self.ciphertext_blob,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", value, e)))
}

fn select_record(
    conn: &Connection,
    user_id: &str,
    platform: &str,
) -> Result<Option<CredentialRecord>, StoreError> {
    let raw = conn
        .query_row(
            &format!(
                "SELECT {} FROM user_integrations WHERE user_id = ?1 AND platform = ?2",
                RECORD_COLUMNS
            ),
            params![user_id, platform],
            RawRecord::from_row,
        )
        .optional()?;

    raw.map(RawRecord::into_record).transpose()
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn upsert(
        &self,
        user_id: &str,
        platform: &str,
        ciphertext_blob: &str,
    ) -> Result<CredentialRecord, StoreError> {
        let user_id = user_id.to_string();
        let platform = platform.to_string();
        let ciphertext_blob = ciphertext_blob.to_string();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let now = Utc::now().to_rfc3339();

            tx.execute(
                r#"
                INSERT INTO user_integrations (
                    id, user_id, platform, ciphertext_blob, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                ON CONFLICT(user_id, platform) DO UPDATE SET
                    ciphertext_blob = excluded.ciphertext_blob,
                    updated_at = excluded.updated_at
                "#,
                params![
                    Uuid::now_v7().to_string(),
                    user_id,
                    platform,
                    ciphertext_blob,
                    now
                ],
            )?;

            let record = select_record(&tx, &user_id, &platform)?.ok_or_else(|| {
                StoreError::Corrupt("upserted record not found on read-back".to_string())
            })?;
            tx.commit()?;

            Ok(record)
        })
        .await
    }

    async fn get(
        &self,
        user_id: &str,
        platform: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let user_id = user_id.to_string();
        let platform = platform.to_string();
        self.with_conn(move |conn| select_record(conn, &user_id, &platform))
            .await
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<IntegrationSummary>, StoreError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM user_integrations WHERE user_id = ?1 ORDER BY platform",
                RECORD_COLUMNS
            ))?;

            let raws = stmt
                .query_map(params![user_id], RawRecord::from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            raws.into_iter()
                .map(|raw| raw.into_record().map(|record| record.summary()))
                .collect()
        })
        .await
    }

    async fn delete_by_id(&self, id: &str, user_id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            // Ownership check and delete in one statement
            let rows_affected = conn.execute(
                "DELETE FROM user_integrations WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )?;
            Ok(rows_affected > 0)
        })
        .await
    }

    async fn delete_by_platform(
        &self,
        user_id: &str,
        platform: &str,
    ) -> Result<usize, StoreError> {
        let user_id = user_id.to_string();
        let platform = platform.to_string();
        self.with_conn(move |conn| {
            let rows_affected = conn.execute(
                "DELETE FROM user_integrations WHERE user_id = ?1 AND platform = ?2",
                params![user_id, platform],
            )?;
            Ok(rows_affected)
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<(String, String)>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT user_id, platform FROM user_integrations ORDER BY user_id, platform")?;

            let pairs = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<(String, String)>, _>>()?;

            Ok(pairs)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> SqliteCredentialStore {
        SqliteCredentialStore::new(":memory:").expect("Failed to create test store")
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let store = create_test_store();

        let record = store.upsert("u1", "youtube", "blob-a").await.unwrap();
        assert_eq!(record.user_id, "u1");
        assert_eq!(record.platform, "youtube");
        assert_eq!(record.ciphertext_blob, "blob-a");
        assert_eq!(record.created_at, record.updated_at);

        let fetched = store.get("u1", "youtube").await.unwrap().unwrap();
        assert_eq!(fetched, record);
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let store = create_test_store();
        assert!(store.get("u1", "youtube").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_blob_in_place() {
        let store = create_test_store();

        let first = store.upsert("u1", "video", "blobA").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.upsert("u1", "video", "blobB").await.unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(second.ciphertext_blob, "blobB");

        let all = store.list_all().await.unwrap();
        assert_eq!(all, vec![("u1".to_string(), "video".to_string())]);
        assert_eq!(
            store.get("u1", "video").await.unwrap().unwrap().ciphertext_blob,
            "blobB"
        );
    }

    #[tokio::test]
    async fn test_reads_are_scoped_by_user() {
        let store = create_test_store();
        store.upsert("u1", "youtube", "u1-blob").await.unwrap();
        store.upsert("u1", "twitch", "u1-blob").await.unwrap();
        store.upsert("u2", "youtube", "u2-blob").await.unwrap();

        let u1 = store.list_for_user("u1").await.unwrap();
        let platforms: Vec<&str> = u1.iter().map(|s| s.platform.as_str()).collect();
        assert_eq!(platforms, vec!["twitch", "youtube"]);

        let u2 = store.list_for_user("u2").await.unwrap();
        assert_eq!(u2.len(), 1);

        assert!(store.list_for_user("u3").await.unwrap().is_empty());
        assert_eq!(
            store.get("u2", "youtube").await.unwrap().unwrap().ciphertext_blob,
            "u2-blob"
        );
        assert!(store.get("u2", "twitch").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_by_id_checks_ownership() {
        let store = create_test_store();
        let theirs = store.upsert("u2", "youtube", "blob").await.unwrap();

        // u1 cannot delete u2's record, and learns nothing about it
        assert!(!store.delete_by_id(&theirs.id, "u1").await.unwrap());
        assert!(store.get("u2", "youtube").await.unwrap().is_some());

        assert!(!store.delete_by_id("no-such-id", "u2").await.unwrap());

        assert!(store.delete_by_id(&theirs.id, "u2").await.unwrap());
        assert!(store.get("u2", "youtube").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_by_platform() {
        let store = create_test_store();
        store.upsert("u1", "youtube", "blob").await.unwrap();
        store.upsert("u2", "youtube", "blob").await.unwrap();

        assert_eq!(store.delete_by_platform("u1", "youtube").await.unwrap(), 1);
        assert_eq!(store.delete_by_platform("u1", "youtube").await.unwrap(), 0);

        // Other users untouched
        assert!(store.get("u2", "youtube").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_upserts_keep_one_row() {
        let store = create_test_store();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.upsert("u1", "youtube", &format!("blob-{}", i)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.db");

        {
            let store = SqliteCredentialStore::new(&path).unwrap();
            store.upsert("u1", "youtube", "persisted").await.unwrap();
        }

        let reopened = SqliteCredentialStore::new(&path).unwrap();
        let record = reopened.get("u1", "youtube").await.unwrap().unwrap();
        assert_eq!(record.ciphertext_blob, "persisted");
    }
}
