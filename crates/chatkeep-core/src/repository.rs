//! ConversationRepository trait definition.
//!
//! The whole surface the chat UI and the message-send pipeline consume:
//! conversation CRUD, message append/list and stats refresh. Message content
//! crosses this boundary as plaintext; encryption at rest is the
//! implementation's concern.

use chatkeep_types::conversation::{Conversation, Message, Role};
use chatkeep_types::error::StoreError;
use uuid::Uuid;

/// Repository trait for conversation and message persistence.
///
/// Implementations live in chatkeep-infra (e.g., `SqliteConversationStore`).
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait ConversationRepository: Send + Sync {
    /// Create a conversation with zeroed counts and both timestamps set to now.
    fn create_conversation(
        &self,
        title: &str,
    ) -> impl std::future::Future<Output = Result<Conversation, StoreError>> + Send;

    /// List all conversations, most recently updated first.
    fn list_conversations(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Conversation>, StoreError>> + Send;

    /// Get a conversation by its ID.
    fn get_conversation(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Conversation>, StoreError>> + Send;

    /// Overwrite title and counts; always stamps `updated_at` with now.
    fn update_conversation(
        &self,
        conversation: &Conversation,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Delete a conversation and, by cascade, all of its messages.
    fn delete_conversation(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Append a message. The returned message carries the plaintext content.
    fn append_message(
        &self,
        conversation_id: &Uuid,
        role: Role,
        text: &str,
        token_count: u32,
    ) -> impl std::future::Future<Output = Result<Message, StoreError>> + Send;

    /// Messages of a conversation in creation order.
    ///
    /// Messages that cannot be decrypted are left out rather than failing the
    /// whole list.
    fn list_messages(
        &self,
        conversation_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, StoreError>> + Send;

    /// Get a single message; an undecryptable message is an error here.
    fn get_message(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Message>, StoreError>> + Send;

    /// Recompute `message_count` and `total_tokens` from the messages table.
    ///
    /// Not automatic: callers invoke it once after writing a user/model pair.
    fn refresh_stats(
        &self,
        conversation_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Delete a single message.
    fn delete_message(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}
