use crate::error::{PersistError, Result};
use crate::models::{CachedMessage, ImageRecord};
use crate::trait_client::PersistenceClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quill_types::{ConfigOverrides, ThreadKey};
use rusqlite::{params, Connection};
use std::path::Path;
use tokio::sync::Mutex;

/// SQLite-backed persistence store.
///
/// One connection guarded by an async mutex; every operation is a short local
/// statement, so contention stays on the order of microseconds.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests and the CLI channel's throwaway mode.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_key TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_key);

            CREATE TABLE IF NOT EXISTS images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_key TEXT NOT NULL,
                url TEXT NOT NULL,
                image_type TEXT NOT NULL,
                prompt TEXT,
                analysis TEXT,
                metadata TEXT,
                message_ts TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_images_thread ON images(thread_key);

            CREATE TABLE IF NOT EXISTS thread_config (
                thread_key TEXT PRIMARY KEY,
                overrides TEXT NOT NULL
            );",
        )?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceClient for SqliteStore {
    async fn cache_message(&self, key: &ThreadKey, message: CachedMessage) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO messages (thread_key, role, content, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key.to_string(),
                message.role,
                message.content,
                message.metadata_json,
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get_cached_messages(&self, key: &ThreadKey) -> Result<Vec<CachedMessage>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT role, content, metadata, created_at FROM messages
             WHERE thread_key = ?1 ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![key.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (role, content, metadata_json, created_at) = row?;
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| PersistError::Internal(format!("bad timestamp in cache: {}", e)))?
                .with_timezone(&Utc);
            messages.push(CachedMessage {
                role,
                content,
                metadata_json,
                created_at,
            });
        }
        Ok(messages)
    }

    async fn clear_thread_messages(&self, key: &ThreadKey) -> Result<()> {
        let conn = self.conn.lock().await;
        let removed = conn.execute(
            "DELETE FROM messages WHERE thread_key = ?1",
            params![key.to_string()],
        )?;
        tracing::debug!("Cleared {} cached message(s) for {}", removed, key);
        Ok(())
    }

    async fn find_thread_images(&self, key: &ThreadKey) -> Result<Vec<ImageRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT url, image_type, prompt, analysis, metadata, message_ts FROM images
             WHERE thread_key = ?1 ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![key.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (url, image_type, prompt, analysis, metadata, message_ts) = row?;
            let metadata = match metadata {
                Some(raw) => Some(serde_json::from_str(&raw)?),
                None => None,
            };
            records.push(ImageRecord {
                url,
                image_type,
                prompt,
                analysis,
                metadata,
                message_ts,
            });
        }
        Ok(records)
    }

    async fn save_image_metadata(&self, key: &ThreadKey, record: ImageRecord) -> Result<()> {
        let metadata = match &record.metadata {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        };

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO images (thread_key, url, image_type, prompt, analysis, metadata, message_ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                key.to_string(),
                record.url,
                record.image_type,
                record.prompt,
                record.analysis,
                metadata,
                record.message_ts,
            ],
        )?;
        Ok(())
    }

    async fn get_config_overrides(&self, key: &ThreadKey) -> Result<ConfigOverrides> {
        let conn = self.conn.lock().await;
        let raw: Option<String> = conn
            .query_row(
                "SELECT overrides FROM thread_config WHERE thread_key = ?1",
                params![key.to_string()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(ConfigOverrides::default()),
        }
    }

    async fn set_config_override(&self, key: &ThreadKey, option: &str, value: &str) -> Result<()> {
        let mut overrides = self.get_config_overrides(key).await?;
        overrides
            .set(option, value)
            .map_err(PersistError::Internal)?;
        let json = serde_json::to_string(&overrides)?;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO thread_config (thread_key, overrides) VALUES (?1, ?2)
             ON CONFLICT(thread_key) DO UPDATE SET overrides = excluded.overrides",
            params![key.to_string(), json],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ThreadKey {
        ThreadKey::new("C1", "T1")
    }

    #[tokio::test]
    async fn test_cache_and_fetch_messages() {
        let store = SqliteStore::open_in_memory().unwrap();

        store
            .cache_message(&key(), CachedMessage::new("user", "hello"))
            .await
            .unwrap();
        store
            .cache_message(&key(), CachedMessage::new("assistant", "hi"))
            .await
            .unwrap();

        let messages = store.get_cached_messages(&key()).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].content, "hi");
    }

    #[tokio::test]
    async fn test_messages_scoped_by_thread_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        let other = ThreadKey::new("C1", "T2");

        store
            .cache_message(&key(), CachedMessage::new("user", "mine"))
            .await
            .unwrap();

        assert!(store.get_cached_messages(&other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_thread_messages() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .cache_message(&key(), CachedMessage::new("user", "hello"))
            .await
            .unwrap();

        store.clear_thread_messages(&key()).await.unwrap();
        assert!(store.get_cached_messages(&key()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_image_metadata_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = ImageRecord::new("https://example.com/cat.png", "generation")
            .with_prompt("a cat")
            .with_message_ts("1718000000.000100");

        store.save_image_metadata(&key(), record.clone()).await.unwrap();

        let found = store.find_thread_images(&key()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0], record);
    }

    #[tokio::test]
    async fn test_config_overrides_default_empty() {
        let store = SqliteStore::open_in_memory().unwrap();
        let overrides = store.get_config_overrides(&key()).await.unwrap();
        assert!(overrides.is_empty());
    }

    #[tokio::test]
    async fn test_set_config_override_merges() {
        let store = SqliteStore::open_in_memory().unwrap();

        store
            .set_config_override(&key(), "model", "gpt-4o-mini")
            .await
            .unwrap();
        store
            .set_config_override(&key(), "temperature", "0.3")
            .await
            .unwrap();

        let overrides = store.get_config_overrides(&key()).await.unwrap();
        assert_eq!(overrides.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(overrides.temperature, Some(0.3));
    }

    #[tokio::test]
    async fn test_set_config_override_rejects_unknown() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = store.set_config_override(&key(), "bogus", "1").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quill.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .cache_message(&key(), CachedMessage::new("user", "persisted"))
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let messages = store.get_cached_messages(&key()).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "persisted");
    }
}
