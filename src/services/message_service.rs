use chrono::Utc;
use uuid::Uuid;

use crate::accounts::AccountDirectory;
use crate::error::{AppError, AppResult};
use crate::models::message::preview_of;
use crate::models::{Conversation, Message, MessageKind, NewMessage};
use crate::presence::PresenceRegistry;
use crate::services::conversation_service::ConversationService;
use crate::state::AppState;
use crate::storage::ChatStore;
use crate::websocket::message_types::ServerEvent;

/// A send request as it arrives off the wire: either an existing
/// conversation id or a bare receiver (the conversation is then resolved or
/// lazily created).
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub conversation_id: Option<Uuid>,
    pub receiver_id: Option<Uuid>,
    pub content: String,
    pub kind: MessageKind,
    pub correlation_id: Option<String>,
}

/// The central business-rule checkpoint: every message passes the full
/// validation ladder here, is persisted atomically with the conversation
/// summary and unread counter, and only then fans out.
pub struct MessagePipeline;

impl MessagePipeline {
    /// Validation order is fixed; the first failure wins and each step maps
    /// to a distinct wire reason:
    ///   1. content non-empty after trimming and within the length cap
    ///   2. sender account usable
    ///   3. sender holds the (expiry-gated) messaging entitlement
    ///   4. receiver account usable
    ///   5. conversation exists/creatable and not blocked
    ///   6. sender and receiver are the conversation's two participants
    pub async fn send(
        state: &AppState,
        sender: Uuid,
        request: SendRequest,
    ) -> AppResult<(Conversation, Message)> {
        let _in_flight = state.in_flight.begin();
        let now = Utc::now();

        // 1. content
        let content = request.content.trim();
        if content.is_empty() {
            return Err(AppError::EmptyContent);
        }
        let max = state.config.max_message_chars;
        if content.chars().count() > max {
            return Err(AppError::ContentTooLong { max });
        }

        // 2. sender account, fetched fresh per send
        let sender_snapshot = state
            .accounts
            .snapshot(sender)
            .await?
            .ok_or(AppError::AccountNotFound)?;
        if sender_snapshot.is_suspended {
            return Err(AppError::AccountSuspended);
        }
        if !sender_snapshot.is_active {
            return Err(AppError::AccountInactive);
        }

        // 3. entitlement
        if !sender_snapshot.is_entitled(now) {
            return Err(AppError::NotEntitled);
        }

        // Resolve the target. With a bare receiver the conversation is
        // created lazily; with an explicit id the receiver is whoever sits
        // across from the sender.
        let (conversation, receiver) = match (request.conversation_id, request.receiver_id) {
            (Some(conversation_id), _) => {
                let conv = ConversationService::authorize(&*state.store, conversation_id, sender)
                    .await?;
                let receiver = conv
                    .other_participant(sender)
                    .ok_or(AppError::NotAParticipant)?;
                (conv, receiver)
            }
            (None, Some(receiver)) => {
                if receiver == sender {
                    return Err(AppError::SelfConversation);
                }
                // account checks precede conversation creation so an invalid
                // receiver never leaves an empty conversation behind
                Self::check_receiver(state, receiver).await?;
                let conv =
                    ConversationService::get_or_create(&*state.store, sender, receiver).await?;
                (conv, receiver)
            }
            (None, None) => {
                return Err(AppError::BadRequest(
                    "send requires a conversation_id or receiver_id".into(),
                ))
            }
        };

        // 4. receiver account (the explicit-conversation path learns the
        // receiver only after lookup)
        if request.conversation_id.is_some() {
            Self::check_receiver(state, receiver).await?;
        }

        // 5. block state
        if conversation.is_blocked() {
            return Err(AppError::ConversationBlocked);
        }

        // 6. membership (the store re-validates the pair on write as well)
        if !conversation.is_participant(sender) || !conversation.is_participant(receiver) {
            return Err(AppError::NotAParticipant);
        }

        let new = NewMessage::new(
            conversation.id,
            sender,
            receiver,
            content.to_string(),
            request.kind,
        );
        let message = state.store.record_message(new).await?;
        crate::metrics::MESSAGES_SENT_TOTAL.inc();

        // Fan-out strictly after the commit, so all subscribers observe
        // persisted-timestamp order within the conversation.
        Ok((conversation, message))
    }

    async fn check_receiver(state: &AppState, receiver: Uuid) -> AppResult<()> {
        let snapshot = state
            .accounts
            .snapshot(receiver)
            .await?
            .ok_or(AppError::NotFound)?;
        if snapshot.is_suspended {
            return Err(AppError::AccountSuspended);
        }
        if !snapshot.is_active {
            return Err(AppError::AccountInactive);
        }
        Ok(())
    }

    /// Deliver an accepted message: the full payload to every handle of
    /// either participant joined to the channel (and always to the
    /// originating handle, exactly once, so the correlation token comes
    /// back), and a light notify to unjoined receiver handles.
    pub async fn fan_out(
        presence: &PresenceRegistry,
        conversation: &Conversation,
        message: &Message,
        correlation_id: Option<String>,
        origin_handle: Option<Uuid>,
    ) {
        let full = ServerEvent::MessageNew {
            conversation_id: conversation.id,
            message: message.clone(),
            correlation_id,
        };
        let notify = ServerEvent::MessageNotify {
            conversation_id: conversation.id,
            sender_id: message.sender_id,
            preview: preview_of(&message.content),
        };

        let mut origin_got_full = false;
        for participant in conversation.participants() {
            for handle in presence.handles_for(participant).await {
                if handle.is_subscribed(conversation.id).await {
                    handle.send(&full);
                    if Some(handle.id) == origin_handle {
                        origin_got_full = true;
                    }
                } else if participant == message.receiver_id {
                    handle.send(&notify);
                }
            }
        }

        if !origin_got_full {
            if let Some(origin_id) = origin_handle {
                if let Some(handle) = presence
                    .handles_for(message.sender_id)
                    .await
                    .into_iter()
                    .find(|h| h.id == origin_id)
                {
                    handle.send(&full);
                }
            }
        }
    }
}
