//! Single-connection SQLite pool in WAL mode.
//!
//! The store funnels every statement through one connection, so writes are
//! serialized and a reader never observes a half-applied turn. Opening the
//! pool runs migrations and a one-time repair of legacy message timestamps.

use std::path::Path;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// Connection handle shared by every store operation.
#[derive(Clone)]
pub struct DatabasePool {
    pub connection: SqlitePool,
}

impl DatabasePool {
    /// Open (creating if missing) the database at `path` and run migrations.
    ///
    /// Foreign keys are enforced so deleting a conversation cascades to its
    /// messages.
    pub async fn open(path: &Path, busy_timeout: Duration) -> Result<Self, sqlx::Error> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(busy_timeout)
            .create_if_missing(true);

        let connection = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::migrate!("../../migrations").run(&connection).await?;

        let pool = Self { connection };
        match pool.repair_message_timestamps().await {
            Ok(0) => {}
            Ok(repaired) => {
                tracing::info!(repaired, "Repaired messages with missing timestamps");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Timestamp repair failed, continuing");
            }
        }

        Ok(pool)
    }

    /// Stamp messages whose `created_at` is missing, blank or the zero date
    /// (`0001-01-01...`) with the current time. Returns the number of rows
    /// repaired.
    pub async fn repair_message_timestamps(&self) -> Result<u64, sqlx::Error> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let result = sqlx::query(
            r#"UPDATE messages SET created_at = ?
               WHERE created_at IS NULL OR created_at = '' OR created_at LIKE '0001-01-01%'"#,
        )
        .bind(now)
        .execute(&self.connection)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn close(&self) {
        self.connection.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp(dir: &tempfile::TempDir) -> DatabasePool {
        DatabasePool::open(&dir.path().join("chats.db"), Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_pool_creates_tables() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_temp(&dir).await;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool.connection)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(table_names, vec!["conversations", "messages"]);
    }

    #[tokio::test]
    async fn test_pool_creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("chats.db");

        DatabasePool::open(&path, Duration::from_secs(5)).await.unwrap();

        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_pool_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_temp(&dir).await;

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool.connection)
            .await
            .unwrap();

        assert_eq!(result.0.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_pool_foreign_keys_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_temp(&dir).await;

        let result: (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool.connection)
            .await
            .unwrap();

        assert_eq!(result.0, 1, "foreign keys should be enabled");
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_temp(&dir).await;
        pool.close().await;

        let pool = open_temp(&dir).await;
        let (applied,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM _sqlx_migrations")
            .fetch_one(&pool.connection)
            .await
            .unwrap();
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn test_repair_message_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_temp(&dir).await;

        sqlx::query(
            "INSERT INTO conversations (id, title, created_at, updated_at) VALUES ('c1', 'Old', '2024-01-01T00:00:00.000000Z', '2024-01-01T00:00:00.000000Z')",
        )
        .execute(&pool.connection)
        .await
        .unwrap();

        let rows = [
            ("m1", Some("0001-01-01T00:00:00.0000000Z")),
            ("m2", Some("")),
            ("m3", None),
            ("m4", Some("2024-01-01T00:00:00.000000Z")),
        ];
        for (id, created_at) in rows {
            sqlx::query(
                "INSERT INTO messages (id, conversation_id, role, content, created_at) VALUES (?, 'c1', 'user', 'hi', ?)",
            )
            .bind(id)
            .bind(created_at)
            .execute(&pool.connection)
            .await
            .unwrap();
        }

        assert_eq!(pool.repair_message_timestamps().await.unwrap(), 3);
        assert_eq!(pool.repair_message_timestamps().await.unwrap(), 0);

        let (untouched,): (String,) =
            sqlx::query_as("SELECT created_at FROM messages WHERE id = 'm4'")
                .fetch_one(&pool.connection)
                .await
                .unwrap();
        assert_eq!(untouched, "2024-01-01T00:00:00.000000Z");
    }
}
