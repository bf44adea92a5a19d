//! SQLite conversation store with encrypted message content.
//!
//! Implements `ConversationRepository` from `chatkeep-core`. The database is
//! opened lazily behind an `InitGate`: the first operation (or an explicit
//! `initialize`) opens the pool, runs migrations and repairs legacy
//! timestamps, and every concurrent caller shares that single attempt.
//!
//! Message content is encrypted with `ContentCipher` on the way in and
//! decrypted on the way out; conversation titles and token counts stay in
//! the clear.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chatkeep_core::gate::InitGate;
use chatkeep_core::protect::SecretProtector;
use chatkeep_core::repository::ConversationRepository;
use chatkeep_types::config::StoreConfig;
use chatkeep_types::conversation::{Conversation, Message, Role, normalize_title};
use chatkeep_types::error::{CipherError, ProtectionError, StoreError};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use crate::config::{build_protector, load_store_config};
use crate::crypto::cipher::ContentCipher;
use crate::crypto::key_manager::KeyManager;
use crate::crypto::protector::ConfiguredProtector;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed implementation of `ConversationRepository`.
pub struct SqliteConversationStore<P: SecretProtector> {
    database_path: PathBuf,
    busy_timeout: Duration,
    gate: InitGate<DatabasePool, StoreError>,
    cipher: ContentCipher<P>,
}

impl<P: SecretProtector> SqliteConversationStore<P> {
    /// Create a store over `database_path`, keeping its wrapped content key
    /// at `key_path`. Nothing is opened until first use.
    pub fn new(
        database_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        protector: P,
    ) -> Self {
        let keys = KeyManager::new(key_path, Arc::new(protector));
        Self {
            database_path: database_path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            gate: InitGate::new(),
            cipher: ContentCipher::new(Arc::new(keys)),
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    /// Open the database now instead of on first use.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        self.pool().await.map(|_| ())
    }

    /// Number of times the database has been opened (including failed
    /// attempts) since this store was created.
    pub fn init_attempts(&self) -> usize {
        self.gate.attempts()
    }

    /// Load or create the content key ahead of the first message.
    pub async fn prepare_encryption(&self) -> Result<(), StoreError> {
        self.cipher.keys().get_or_create_key().await?;
        Ok(())
    }

    /// Close the connection and drop the cached key.
    ///
    /// A pool that is still being opened is awaited and closed as well. The
    /// next operation reopens the database and reloads the key.
    pub async fn close(&self) {
        if let Some(pool) = self.gate.drain().await {
            pool.close().await;
            tracing::debug!(path = %self.database_path.display(), "Database closed");
        }
        self.cipher.keys().forget();
    }

    async fn pool(&self) -> Result<DatabasePool, StoreError> {
        let path = self.database_path.clone();
        let busy_timeout = self.busy_timeout;
        self.gate
            .ensure_ready(move || async move {
                tracing::info!(path = %path.display(), "Opening conversation store");
                DatabasePool::open(&path, busy_timeout).await.map_err(|e| {
                    tracing::error!(path = %path.display(), error = %e, "Failed to open conversation store");
                    StoreError::Initialization(e.to_string())
                })
            })
            .await
    }

    async fn encrypt(&self, text: &str) -> Result<String, StoreError> {
        self.cipher
            .encrypt(text)
            .await
            .map_err(|e| match e {
                CipherError::Key(key) => key.into(),
                other => StoreError::Encryption(other.to_string()),
            })
    }
}

impl SqliteConversationStore<ConfiguredProtector> {
    /// Build a store from configuration, resolving file names against
    /// `data_dir`.
    pub fn from_config(data_dir: &Path, config: &StoreConfig) -> Result<Self, ProtectionError> {
        let protector = build_protector(&config.protection)?;
        Ok(Self::new(
            data_dir.join(&config.database_file),
            data_dir.join(&config.key_file),
            protector,
        )
        .with_busy_timeout(Duration::from_secs(config.busy_timeout_secs)))
    }

    /// Load `config.toml` from `data_dir` (or defaults) and build a store.
    pub async fn from_data_dir(data_dir: &Path) -> Result<Self, StoreError> {
        let config = load_store_config(data_dir).await;
        Self::from_config(data_dir, &config).map_err(|e| StoreError::Protection(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct ConversationRow {
    id: String,
    title: String,
    created_at: String,
    updated_at: String,
    message_count: i64,
    total_tokens: i64,
}

impl ConversationRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            message_count: row.try_get("message_count")?,
            total_tokens: row.try_get("total_tokens")?,
        })
    }

    fn into_conversation(self) -> Result<Conversation, StoreError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| StoreError::Storage(format!("invalid conversation id: {e}")))?;

        Ok(Conversation {
            id,
            title: self.title,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            message_count: column_int("message_count", self.message_count)?,
            total_tokens: column_int("total_tokens", self.total_tokens)?,
        })
    }
}

/// Message row with content still in its stored (encrypted) form.
struct MessageRow {
    id: Uuid,
    conversation_id: String,
    role: String,
    content: String,
    created_at: Option<String>,
    token_count: i64,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, StoreError> {
        let id: String = row.try_get("id").map_err(storage)?;
        let id = Uuid::parse_str(&id)
            .map_err(|e| StoreError::Storage(format!("invalid message id: {e}")))?;

        Ok(Self {
            id,
            conversation_id: row.try_get("conversation_id").map_err(storage)?,
            role: row.try_get("role").map_err(storage)?,
            content: row.try_get("content").map_err(storage)?,
            created_at: row.try_get("created_at").map_err(storage)?,
            token_count: row.try_get("token_count").map_err(storage)?,
        })
    }

    fn into_message(self, content: String) -> Result<Message, StoreError> {
        let conversation_id = Uuid::parse_str(&self.conversation_id)
            .map_err(|e| StoreError::Storage(format!("invalid conversation_id: {e}")))?;
        let role: Role = self.role.parse().map_err(StoreError::Storage)?;
        let created_at = match self.created_at.as_deref() {
            Some(s) if !s.is_empty() => parse_datetime(s)?,
            _ => DateTime::<Utc>::default(),
        };

        Ok(Message {
            id: self.id,
            conversation_id,
            role,
            content,
            created_at,
            token_count: column_int("token_count", self.token_count)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn storage(e: sqlx::Error) -> StoreError {
    StoreError::Storage(e.to_string())
}

/// Convert an INTEGER column, rejecting values the domain type cannot hold.
fn column_int<T: TryFrom<i64>>(column: &str, value: i64) -> Result<T, StoreError> {
    T::try_from(value).map_err(|_| StoreError::Storage(format!("{column} out of range: {value}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Storage(format!("invalid datetime: {e}")))
}

/// Fixed-width UTC timestamps so text ordering in SQL is chronological.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time at the precision that is stored.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// ---------------------------------------------------------------------------
// ConversationRepository implementation
// ---------------------------------------------------------------------------

impl<P: SecretProtector> ConversationRepository for SqliteConversationStore<P> {
    async fn create_conversation(&self, title: &str) -> Result<Conversation, StoreError> {
        let pool = self.pool().await?;
        let now = now();
        let conversation = Conversation {
            id: Uuid::now_v7(),
            title: normalize_title(title),
            created_at: now,
            updated_at: now,
            message_count: 0,
            total_tokens: 0,
        };

        sqlx::query(
            r#"INSERT INTO conversations (id, title, created_at, updated_at, message_count, total_tokens)
               VALUES (?, ?, ?, ?, 0, 0)"#,
        )
        .bind(conversation.id.to_string())
        .bind(&conversation.title)
        .bind(format_datetime(&conversation.created_at))
        .bind(format_datetime(&conversation.updated_at))
        .execute(&pool.connection)
        .await
        .map_err(storage)?;

        Ok(conversation)
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let pool = self.pool().await?;
        let rows = sqlx::query("SELECT * FROM conversations ORDER BY updated_at DESC, rowid DESC")
            .fetch_all(&pool.connection)
            .await
            .map_err(storage)?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in &rows {
            let conversation_row = ConversationRow::from_row(row).map_err(storage)?;
            conversations.push(conversation_row.into_conversation()?);
        }

        Ok(conversations)
    }

    async fn get_conversation(&self, id: &Uuid) -> Result<Option<Conversation>, StoreError> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&pool.connection)
            .await
            .map_err(storage)?;

        match row {
            Some(row) => {
                let conversation_row = ConversationRow::from_row(&row).map_err(storage)?;
                Ok(Some(conversation_row.into_conversation()?))
            }
            None => Ok(None),
        }
    }

    async fn update_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let total_tokens = i64::try_from(conversation.total_tokens)
            .map_err(|_| StoreError::Storage("total_tokens out of range".to_string()))?;
        let pool = self.pool().await?;
        let result = sqlx::query(
            r#"UPDATE conversations
               SET title = ?, message_count = ?, total_tokens = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(normalize_title(&conversation.title))
        .bind(i64::from(conversation.message_count))
        .bind(total_tokens)
        .bind(format_datetime(&now()))
        .bind(conversation.id.to_string())
        .execute(&pool.connection)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        Ok(())
    }

    async fn delete_conversation(&self, id: &Uuid) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id.to_string())
            .execute(&pool.connection)
            .await
            .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        Ok(())
    }

    async fn append_message(
        &self,
        conversation_id: &Uuid,
        role: Role,
        text: &str,
        token_count: u32,
    ) -> Result<Message, StoreError> {
        let pool = self.pool().await?;
        let stored = self.encrypt(text).await?;
        let message = Message {
            id: Uuid::now_v7(),
            conversation_id: *conversation_id,
            role,
            content: text.to_string(),
            created_at: now(),
            token_count,
        };

        sqlx::query(
            r#"INSERT INTO messages (id, conversation_id, role, content, created_at, token_count)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(message.id.to_string())
        .bind(message.conversation_id.to_string())
        .bind(message.role.to_string())
        .bind(stored)
        .bind(format_datetime(&message.created_at))
        .bind(i64::from(message.token_count))
        .execute(&pool.connection)
        .await
        .map_err(storage)?;

        Ok(message)
    }

    async fn list_messages(&self, conversation_id: &Uuid) -> Result<Vec<Message>, StoreError> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(conversation_id.to_string())
        .fetch_all(&pool.connection)
        .await
        .map_err(storage)?;

        let message_rows = rows
            .iter()
            .map(MessageRow::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        drop(rows);

        let mut messages = Vec::with_capacity(message_rows.len());
        for message_row in message_rows {
            match self.cipher.decrypt(&message_row.content).await {
                Ok(content) => messages.push(message_row.into_message(content)?),
                Err(CipherError::Decryption) => {
                    tracing::error!(
                        message_id = %message_row.id,
                        conversation_id = %conversation_id,
                        "Skipping message that could not be decrypted"
                    );
                }
                Err(CipherError::Key(key)) => return Err(key.into()),
                Err(CipherError::Encryption) => {
                    return Err(StoreError::Encryption(CipherError::Encryption.to_string()));
                }
            }
        }

        Ok(messages)
    }

    async fn get_message(&self, id: &Uuid) -> Result<Option<Message>, StoreError> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&pool.connection)
            .await
            .map_err(storage)?;

        let Some(message_row) = row.as_ref().map(MessageRow::from_row).transpose()? else {
            return Ok(None);
        };
        let content = match self.cipher.decrypt(&message_row.content).await {
            Ok(content) => content,
            Err(CipherError::Decryption) => return Err(StoreError::Decryption(message_row.id)),
            Err(CipherError::Key(key)) => return Err(key.into()),
            Err(CipherError::Encryption) => {
                return Err(StoreError::Encryption(CipherError::Encryption.to_string()));
            }
        };

        Ok(Some(message_row.into_message(content)?))
    }

    async fn refresh_stats(&self, conversation_id: &Uuid) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let id = conversation_id.to_string();
        let result = sqlx::query(
            r#"UPDATE conversations
               SET message_count = (SELECT COUNT(*) FROM messages WHERE conversation_id = ?),
                   total_tokens = (SELECT COALESCE(SUM(token_count), 0) FROM messages WHERE conversation_id = ?),
                   updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&id)
        .bind(&id)
        .bind(format_datetime(&now()))
        .bind(&id)
        .execute(&pool.connection)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        Ok(())
    }

    async fn delete_message(&self, id: &Uuid) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let result = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(id.to_string())
            .execute(&pool.connection)
            .await
            .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        Ok(())
    }
}
