use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Conversation, Message, NewMessage};

pub mod memory;
pub mod postgres;

pub use memory::MemoryChatStore;
pub use postgres::PgChatStore;

/// Required persistence operations for the messaging core. The engine behind
/// this trait is an external concern; the core relies only on the consistency
/// contracts spelled out per method.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Find or create the unique conversation for an unordered pair.
    /// Must be idempotent under concurrent calls: a race between two callers
    /// for the same pair yields one conversation (uniqueness constraint with
    /// insert-on-conflict-then-reread, or an equivalent serialization point).
    /// A previously deleted conversation is revived rather than duplicated,
    /// unless it still carries a block, in which case the call fails with
    /// `ConversationBlocked` and the conversation stays deleted.
    async fn get_or_create_conversation(&self, a: Uuid, b: Uuid) -> AppResult<Conversation>;

    async fn conversation(&self, id: Uuid) -> AppResult<Option<Conversation>>;

    /// Conversations the user participates in, most recent activity first.
    async fn conversations_for(&self, user: Uuid) -> AppResult<Vec<Conversation>>;

    /// Apply a block transition for `actor` under the store's serialization
    /// point, so two participants racing to block cannot overwrite each
    /// other. Blocking an unblocked conversation records the actor;
    /// re-blocking one's own block and unblocking an unblocked conversation
    /// are no-ops; any transition against another user's block fails with
    /// `ConversationBlocked`. Participant membership is checked by the
    /// directory service.
    async fn set_blocked(&self, id: Uuid, actor: Uuid, blocked: bool) -> AppResult<()>;

    /// Persist a message and, in the same transaction, update the owning
    /// conversation's last-message summary, bump its activity timestamp and
    /// increment the receiver's unread counter. Either all of it becomes
    /// visible or none of it. Fails with `NotAParticipant` if the receiver
    /// is outside the conversation's pair (unread keys never leave the
    /// participant set).
    async fn record_message(&self, new: NewMessage) -> AppResult<Message>;

    async fn message(&self, id: Uuid) -> AppResult<Option<Message>>;

    /// Messages of a conversation in (created_at, id) ascending order,
    /// soft-deleted rows excluded. `before` pages backwards in time.
    async fn messages_for(
        &self,
        conversation_id: Uuid,
        limit: i64,
        before: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<Message>>;

    /// Flip the read flag (and timestamp) on every unread message addressed
    /// to `reader` and zero only `reader`'s unread counter. Idempotent.
    /// Returns the number of messages flagged by this call.
    async fn mark_read(&self, conversation_id: Uuid, reader: Uuid, at: DateTime<Utc>)
        -> AppResult<u64>;

    /// Soft-delete one message; it disappears from retrieval but is retained
    /// for audit.
    async fn soft_delete_message(&self, message_id: Uuid) -> AppResult<()>;

    /// Tombstone a conversation and soft-delete its messages.
    async fn delete_conversation(&self, conversation_id: Uuid) -> AppResult<()>;

    /// Aggregate unread count across all of the user's conversations.
    async fn unread_total(&self, user: Uuid) -> AppResult<i64>;
}
