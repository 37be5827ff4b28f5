use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::Conversation;
use crate::storage::ChatStore;

/// Conversation directory: existence, lookup, the two-participant
/// membership rules and the block marker.
pub struct ConversationService;

impl ConversationService {
    /// Find or lazily create the unique conversation for an unordered pair.
    pub async fn get_or_create(
        store: &dyn ChatStore,
        a: Uuid,
        b: Uuid,
    ) -> AppResult<Conversation> {
        if a == b {
            return Err(AppError::SelfConversation);
        }
        store.get_or_create_conversation(a, b).await
    }

    /// Membership authorization: the conversation must exist and `user`
    /// must be one of its two participants.
    pub async fn authorize(
        store: &dyn ChatStore,
        conversation_id: Uuid,
        user: Uuid,
    ) -> AppResult<Conversation> {
        let conv = store
            .conversation(conversation_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !conv.is_participant(user) {
            return Err(AppError::NotAParticipant);
        }
        Ok(conv)
    }

    /// Block or unblock. Only a participant may block; only the user who
    /// imposed the block may lift it, and the counterpart cannot stack a
    /// second block on top. The transition itself is applied atomically by
    /// the store, so concurrent blockers cannot overwrite each other.
    pub async fn set_blocked(
        store: &dyn ChatStore,
        conversation_id: Uuid,
        actor: Uuid,
        blocked: bool,
    ) -> AppResult<Conversation> {
        Self::authorize(store, conversation_id, actor).await?;
        store.set_blocked(conversation_id, actor, blocked).await?;
        Self::authorize(store, conversation_id, actor).await
    }

    /// Participant-initiated deletion: tombstones the conversation and
    /// soft-deletes its messages.
    pub async fn delete(
        store: &dyn ChatStore,
        conversation_id: Uuid,
        user: Uuid,
    ) -> AppResult<()> {
        Self::authorize(store, conversation_id, user).await?;
        store.delete_conversation(conversation_id).await
    }
}
