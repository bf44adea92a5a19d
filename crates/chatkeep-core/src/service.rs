//! Chat service sequencing store calls for the message-send pipeline.
//!
//! ChatService wraps a `ConversationRepository` and owns the one piece of
//! ordering the store leaves to its caller: a turn writes the user message,
//! then the model message, then refreshes the conversation's stats once.

use chatkeep_types::conversation::{Conversation, Message, Role, normalize_title};
use chatkeep_types::error::StoreError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::repository::ConversationRepository;

/// One user prompt and the model's reply, ready to be persisted.
#[derive(Debug, Clone)]
pub struct Turn {
    pub user_text: String,
    pub user_tokens: u32,
    pub model_text: String,
    pub model_tokens: u32,
}

/// The two messages written for a [`Turn`].
#[derive(Debug, Clone)]
pub struct RecordedTurn {
    pub user: Message,
    pub model: Message,
}

/// Orchestrates conversation lifecycle and turn persistence.
///
/// Generic over `ConversationRepository` so chatkeep-core never depends on
/// chatkeep-infra.
pub struct ChatService<R: ConversationRepository> {
    repo: R,
}

impl<R: ConversationRepository> ChatService<R> {
    /// Create a new chat service over the given repository.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Start a new conversation. Blank titles become "New Chat".
    pub async fn new_chat(&self, title: &str) -> Result<Conversation, StoreError> {
        let conversation = self.repo.create_conversation(&normalize_title(title)).await?;
        info!(conversation_id = %conversation.id, "Conversation created");
        Ok(conversation)
    }

    /// All conversations, most recently active first.
    pub async fn chats(&self) -> Result<Vec<Conversation>, StoreError> {
        self.repo.list_conversations().await
    }

    pub async fn chat(&self, id: &Uuid) -> Result<Option<Conversation>, StoreError> {
        self.repo.get_conversation(id).await
    }

    pub async fn delete_chat(&self, id: &Uuid) -> Result<(), StoreError> {
        self.repo.delete_conversation(id).await?;
        info!(conversation_id = %id, "Conversation deleted");
        Ok(())
    }

    /// Rename a conversation.
    ///
    /// Renaming a conversation that no longer exists is logged and ignored.
    pub async fn rename_chat(&self, id: &Uuid, title: &str) -> Result<(), StoreError> {
        match self.repo.get_conversation(id).await? {
            Some(mut conversation) => {
                conversation.title = normalize_title(title);
                self.repo.update_conversation(&conversation).await?;
                info!(conversation_id = %id, "Conversation renamed");
            }
            None => {
                warn!(conversation_id = %id, "Attempted to rename non-existent conversation");
            }
        }
        Ok(())
    }

    /// Conversation history in creation order, as context for the next request.
    pub async fn history(&self, id: &Uuid) -> Result<Vec<Message>, StoreError> {
        self.repo.list_messages(id).await
    }

    /// Persist a completed turn and refresh the conversation's stats.
    ///
    /// Stats are refreshed after both messages are written so listings never
    /// show a half-recorded turn.
    pub async fn record_turn(
        &self,
        conversation_id: &Uuid,
        turn: Turn,
    ) -> Result<RecordedTurn, StoreError> {
        let user = self
            .repo
            .append_message(conversation_id, Role::User, &turn.user_text, turn.user_tokens)
            .await?;
        let model = self
            .repo
            .append_message(
                conversation_id,
                Role::Model,
                &turn.model_text,
                turn.model_tokens,
            )
            .await?;
        self.repo.refresh_stats(conversation_id).await?;

        debug!(
            conversation_id = %conversation_id,
            tokens = u64::from(turn.user_tokens) + u64::from(turn.model_tokens),
            "Turn recorded"
        );

        Ok(RecordedTurn { user, model })
    }
}
