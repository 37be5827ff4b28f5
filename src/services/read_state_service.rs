use chrono::Utc;
use uuid::Uuid;

use crate::error::AppResult;
use crate::presence::PresenceRegistry;
use crate::services::conversation_service::ConversationService;
use crate::state::AppState;
use crate::storage::ChatStore;
use crate::websocket::message_types::ServerEvent;

/// Read-state tracking: per-participant unread counters and read receipts.
pub struct ReadStateService;

impl ReadStateService {
    /// Mark everything addressed to `reader` in the conversation as read:
    /// flips unread message flags, zeroes the reader's counter, and tells
    /// the counterpart's live handles. Idempotent; a second call finds
    /// nothing to flip and sends nothing.
    pub async fn mark_read(state: &AppState, conversation_id: Uuid, reader: Uuid) -> AppResult<u64> {
        let conv = ConversationService::authorize(&*state.store, conversation_id, reader).await?;
        let flipped = state
            .store
            .mark_read(conversation_id, reader, Utc::now())
            .await?;

        if flipped > 0 {
            if let Some(counterpart) = conv.other_participant(reader) {
                Self::broadcast_read(&state.presence, conversation_id, reader, counterpart).await;
            }
        }
        Ok(flipped)
    }

    /// Total unread across all of a user's conversations, for badge counts.
    pub async fn unread_total(store: &dyn ChatStore, user: Uuid) -> AppResult<i64> {
        store.unread_total(user).await
    }

    async fn broadcast_read(
        presence: &PresenceRegistry,
        conversation_id: Uuid,
        reader: Uuid,
        counterpart: Uuid,
    ) {
        let event = ServerEvent::Read {
            conversation_id,
            user_id: reader,
        };
        for handle in presence.handles_for(counterpart).await {
            handle.send(&event);
        }
    }
}
