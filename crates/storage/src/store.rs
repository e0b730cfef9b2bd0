//! SQLite-backed chunk store.
//!
//! Holds two tables: `task_metadata` (one row per in-progress resource) and
//! `chunks` (one row per committed byte range). Both are addressed by the
//! resource URL, which this crate treats as an opaque primary key.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};

use crate::error::{classify_sqlx_error, StoreError};
use crate::types::{ChunkRecord, TaskMetadata};

/// Durable, indexed key/value store for task metadata and chunk blobs.
///
/// Cloning is cheap: it shares the underlying connection pool, the way
/// `zakkums-Debian-Download-Manager`'s `ResumeDb` wraps a `Pool<Sqlite>`
/// behind a `#[derive(Clone)]` handle.
#[derive(Clone)]
pub struct ChunkStore {
    pool: Pool<Sqlite>,
}

impl ChunkStore {
    /// Opens (or creates) the default store under the user's data directory:
    /// `<data-dir>/rangefetch/chunks.db`. The directory is created lazily on
    /// first use; there is no explicit teardown.
    pub async fn open_default() -> Result<Self, StoreError> {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("rangefetch");
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| StoreError::StorageFailure(e.to_string()))?;
        let db_path = data_dir.join("chunks.db");
        let uri = format!("sqlite://{}?mode=rwc", db_path.display());
        tracing::debug!(path = %db_path.display(), "opening chunk store");
        Self::open(&uri).await
    }

    /// Opens a store at an explicit `sqlite://` URI (file path or
    /// `sqlite::memory:` for tests).
    pub async fn open(uri: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(uri)
            .await
            .map_err(classify_sqlx_error)?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Opens a private in-memory store, for tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        // A single connection, or the pool may hand back a second, empty
        // in-memory database to a concurrent caller.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(classify_sqlx_error)?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_metadata (
                url TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                total_bytes INTEGER NOT NULL,
                downloaded_bytes INTEGER NOT NULL,
                supports_resume INTEGER NOT NULL,
                chunk_size INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                blob BLOB NOT NULL,
                UNIQUE(url, chunk_index)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        Ok(())
    }

    /// Returns the metadata record for `url`, if a download is in progress.
    pub async fn get_metadata(&self, url: &str) -> Result<Option<TaskMetadata>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT url, filename, total_bytes, downloaded_bytes, supports_resume, chunk_size
            FROM task_metadata
            WHERE url = ?1
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(TaskMetadata {
            url: row.get("url"),
            filename: row.get("filename"),
            total_bytes: row.get::<i64, _>("total_bytes") as u64,
            downloaded_bytes: row.get::<i64, _>("downloaded_bytes") as u64,
            supports_resume: row.get::<i64, _>("supports_resume") != 0,
            chunk_size: row.get::<i64, _>("chunk_size") as u64,
        }))
    }

    /// Upserts the metadata record for `record.url`.
    pub async fn put_metadata(&self, record: &TaskMetadata) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO task_metadata (url, filename, total_bytes, downloaded_bytes, supports_resume, chunk_size)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(url) DO UPDATE SET
                filename = excluded.filename,
                total_bytes = excluded.total_bytes,
                downloaded_bytes = excluded.downloaded_bytes,
                supports_resume = excluded.supports_resume,
                chunk_size = excluded.chunk_size
            "#,
        )
        .bind(&record.url)
        .bind(&record.filename)
        .bind(record.total_bytes as i64)
        .bind(record.downloaded_bytes as i64)
        .bind(record.supports_resume as i64)
        .bind(record.chunk_size as i64)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        Ok(())
    }

    /// Deletes the metadata record for `url`, if any.
    pub async fn delete_metadata(&self, url: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM task_metadata WHERE url = ?1")
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(())
    }

    /// Stores a chunk, unless `(url, index)` is already present.
    ///
    /// Idempotent by design: a retry that crosses a successful-write
    /// boundary must not corrupt a chunk that already landed.
    pub async fn put_chunk(&self, url: &str, index: u64, bytes: &[u8]) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO chunks (url, chunk_index, blob)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(url, chunk_index) DO NOTHING
            "#,
        )
        .bind(url)
        .bind(index as i64)
        .bind(bytes)
        .execute(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;
        Ok(())
    }

    /// Returns all chunks for `url`, ordered ascending by index.
    pub async fn list_chunks(&self, url: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_index, blob
            FROM chunks
            WHERE url = ?1
            ORDER BY chunk_index ASC
            "#,
        )
        .bind(url)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let index: i64 = row.get("chunk_index");
                let blob: Vec<u8> = row.get("blob");
                (index as u64, blob)
            })
            .collect())
    }

    /// Bulk-removes every chunk stored for `url`.
    pub async fn delete_chunks(&self, url: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM chunks WHERE url = ?1")
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(())
    }

    /// Wipes both collections. Mainly useful for tests and a `reset` CLI
    /// escape hatch; not exercised by the task state machine itself.
    pub async fn reset(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM task_metadata")
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
        sqlx::query("DELETE FROM chunks")
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(())
    }

    /// Convenience used by task assembly/cancellation: purge every trace of
    /// one resource in a single call.
    pub async fn purge(&self, url: &str) -> Result<(), StoreError> {
        self.delete_chunks(url).await?;
        self.delete_metadata(url).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metadata_roundtrip() {
        let store = ChunkStore::open_in_memory().await.unwrap();
        assert!(store.get_metadata("http://h/f.bin").await.unwrap().is_none());

        let record = TaskMetadata {
            url: "http://h/f.bin".into(),
            filename: "f.bin".into(),
            total_bytes: 100,
            downloaded_bytes: 0,
            supports_resume: true,
            chunk_size: 10,
        };
        store.put_metadata(&record).await.unwrap();
        let fetched = store.get_metadata("http://h/f.bin").await.unwrap().unwrap();
        assert_eq!(fetched, record);

        store.delete_metadata("http://h/f.bin").await.unwrap();
        assert!(store.get_metadata("http://h/f.bin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_metadata_is_an_upsert() {
        let store = ChunkStore::open_in_memory().await.unwrap();
        let mut record = TaskMetadata {
            url: "http://h/f.bin".into(),
            filename: "f.bin".into(),
            total_bytes: 100,
            downloaded_bytes: 0,
            supports_resume: true,
            chunk_size: 10,
        };
        store.put_metadata(&record).await.unwrap();
        record.downloaded_bytes = 50;
        store.put_metadata(&record).await.unwrap();

        let fetched = store.get_metadata("http://h/f.bin").await.unwrap().unwrap();
        assert_eq!(fetched.downloaded_bytes, 50);
    }

    #[tokio::test]
    async fn put_chunk_is_idempotent() {
        let store = ChunkStore::open_in_memory().await.unwrap();
        store.put_chunk("http://h/f.bin", 0, b"first").await.unwrap();
        store.put_chunk("http://h/f.bin", 0, b"second").await.unwrap();

        let chunks = store.list_chunks("http://h/f.bin").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], (0, b"first".to_vec()));
    }

    #[tokio::test]
    async fn list_chunks_is_ordered_ascending() {
        let store = ChunkStore::open_in_memory().await.unwrap();
        store.put_chunk("http://h/f.bin", 2, b"c").await.unwrap();
        store.put_chunk("http://h/f.bin", 0, b"a").await.unwrap();
        store.put_chunk("http://h/f.bin", 1, b"b").await.unwrap();

        let chunks = store.list_chunks("http://h/f.bin").await.unwrap();
        let indices: Vec<u64> = chunks.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn delete_chunks_is_scoped_to_url() {
        let store = ChunkStore::open_in_memory().await.unwrap();
        store.put_chunk("http://h/a.bin", 0, b"a").await.unwrap();
        store.put_chunk("http://h/b.bin", 0, b"b").await.unwrap();

        store.delete_chunks("http://h/a.bin").await.unwrap();

        assert!(store.list_chunks("http://h/a.bin").await.unwrap().is_empty());
        assert_eq!(store.list_chunks("http://h/b.bin").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reset_wipes_both_collections() {
        let store = ChunkStore::open_in_memory().await.unwrap();
        store
            .put_metadata(&TaskMetadata {
                url: "http://h/f.bin".into(),
                filename: "f.bin".into(),
                total_bytes: 100,
                downloaded_bytes: 0,
                supports_resume: true,
                chunk_size: 10,
            })
            .await
            .unwrap();
        store.put_chunk("http://h/f.bin", 0, b"a").await.unwrap();

        store.reset().await.unwrap();

        assert!(store.get_metadata("http://h/f.bin").await.unwrap().is_none());
        assert!(store.list_chunks("http://h/f.bin").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_removes_metadata_and_chunks_together() {
        let store = ChunkStore::open_in_memory().await.unwrap();
        store
            .put_metadata(&TaskMetadata {
                url: "http://h/f.bin".into(),
                filename: "f.bin".into(),
                total_bytes: 100,
                downloaded_bytes: 0,
                supports_resume: true,
                chunk_size: 10,
            })
            .await
            .unwrap();
        store.put_chunk("http://h/f.bin", 0, b"a").await.unwrap();

        store.purge("http://h/f.bin").await.unwrap();

        assert!(store.get_metadata("http://h/f.bin").await.unwrap().is_none());
        assert!(store.list_chunks("http://h/f.bin").await.unwrap().is_empty());
    }
}
