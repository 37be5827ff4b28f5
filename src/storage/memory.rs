use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::conversation::normalize_pair;
use crate::models::message::preview_of;
use crate::models::{Conversation, LastMessage, Message, NewMessage, UnreadCounters};
use crate::storage::ChatStore;

#[derive(Default)]
struct Inner {
    conversations: HashMap<Uuid, Conversation>,
    pair_index: HashMap<(Uuid, Uuid), Uuid>,
    // per-conversation, insertion order (ties on created_at resolve by it)
    messages: HashMap<Uuid, Vec<Message>>,
    tombstoned: HashSet<Uuid>,
}

/// In-memory `ChatStore`. One mutex is the serialization point, which gives
/// every multi-step operation the same atomicity the Postgres backend gets
/// from transactions. Used by the test suite.
#[derive(Default)]
pub struct MemoryChatStore {
    inner: Mutex<Inner>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn get_or_create_conversation(&self, a: Uuid, b: Uuid) -> AppResult<Conversation> {
        let (low, high) = normalize_pair(a, b);
        let mut inner = self.inner.lock().await;
        if let Some(id) = inner.pair_index.get(&(low, high)).copied() {
            let conv = inner
                .conversations
                .get(&id)
                .cloned()
                .ok_or(AppError::Internal)?;
            if inner.tombstoned.contains(&id) {
                // a deleted conversation under someone's block stays deleted
                if conv.is_blocked() {
                    return Err(AppError::ConversationBlocked);
                }
                inner.tombstoned.remove(&id);
            }
            return Ok(conv);
        }
        let now = Utc::now();
        let conv = Conversation {
            id: Uuid::new_v4(),
            user_low: low,
            user_high: high,
            blocked_by: None,
            unread: UnreadCounters::default(),
            last_message: None,
            created_at: now,
            last_activity_at: now,
        };
        inner.pair_index.insert((low, high), conv.id);
        inner.conversations.insert(conv.id, conv.clone());
        Ok(conv)
    }

    async fn conversation(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        let inner = self.inner.lock().await;
        if inner.tombstoned.contains(&id) {
            return Ok(None);
        }
        Ok(inner.conversations.get(&id).cloned())
    }

    async fn conversations_for(&self, user: Uuid) -> AppResult<Vec<Conversation>> {
        let inner = self.inner.lock().await;
        let mut out: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.is_participant(user) && !inner.tombstoned.contains(&c.id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(out)
    }

    async fn set_blocked(&self, id: Uuid, actor: Uuid, blocked: bool) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.tombstoned.contains(&id) {
            return Err(AppError::NotFound);
        }
        let conv = inner.conversations.get_mut(&id).ok_or(AppError::NotFound)?;
        match (blocked, conv.blocked_by) {
            (true, None) => conv.blocked_by = Some(actor),
            (true, Some(blocker)) if blocker == actor => {}
            (false, Some(blocker)) if blocker == actor => conv.blocked_by = None,
            (false, None) => {}
            _ => return Err(AppError::ConversationBlocked),
        }
        Ok(())
    }

    async fn record_message(&self, new: NewMessage) -> AppResult<Message> {
        let mut inner = self.inner.lock().await;
        let conv = inner
            .conversations
            .get_mut(&new.conversation_id)
            .ok_or(AppError::NotFound)?;
        let receiver_side = conv.side_of(new.receiver_id).ok_or(AppError::NotAParticipant)?;
        if !conv.is_participant(new.sender_id) {
            return Err(AppError::NotAParticipant);
        }

        let message = new.clone().into_message();
        conv.unread.increment(receiver_side);
        conv.last_message = Some(LastMessage {
            preview: preview_of(&message.content),
            sender_id: message.sender_id,
            kind: message.kind,
            sent_at: message.created_at,
        });
        conv.last_activity_at = message.created_at;
        inner
            .messages
            .entry(new.conversation_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn message(&self, id: Uuid) -> AppResult<Option<Message>> {
        let inner = self.inner.lock().await;
        for list in inner.messages.values() {
            if let Some(m) = list.iter().find(|m| m.id == id) {
                return Ok(Some(m.clone()));
            }
        }
        Ok(None)
    }

    async fn messages_for(
        &self,
        conversation_id: Uuid,
        limit: i64,
        before: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<Message>> {
        let limit = limit.clamp(1, 200);
        let inner = self.inner.lock().await;
        let mut out: Vec<Message> = inner
            .messages
            .get(&conversation_id)
            .map(|list| {
                list.iter()
                    .filter(|m| m.deleted_at.is_none())
                    .filter(|m| before.map_or(true, |b| m.created_at < b))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // insertion order already breaks created_at ties
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if out.len() as i64 > limit {
            out = out.split_off(out.len() - limit as usize);
        }
        Ok(out)
    }

    async fn mark_read(
        &self,
        conversation_id: Uuid,
        reader: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<u64> {
        let mut inner = self.inner.lock().await;
        let conv = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(AppError::NotFound)?;
        let side = conv.side_of(reader).ok_or(AppError::NotAParticipant)?;
        conv.unread.reset(side);
        let mut flagged = 0;
        if let Some(list) = inner.messages.get_mut(&conversation_id) {
            for m in list.iter_mut() {
                if m.receiver_id == reader && !m.is_read && m.deleted_at.is_none() {
                    m.is_read = true;
                    m.read_at = Some(at);
                    flagged += 1;
                }
            }
        }
        Ok(flagged)
    }

    async fn soft_delete_message(&self, message_id: Uuid) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        for list in inner.messages.values_mut() {
            if let Some(m) = list.iter_mut().find(|m| m.id == message_id) {
                if m.deleted_at.is_none() {
                    m.deleted_at = Some(Utc::now());
                }
                return Ok(());
            }
        }
        Err(AppError::NotFound)
    }

    async fn delete_conversation(&self, conversation_id: Uuid) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.conversations.contains_key(&conversation_id) {
            return Err(AppError::NotFound);
        }
        let now = Utc::now();
        if let Some(list) = inner.messages.get_mut(&conversation_id) {
            for m in list.iter_mut() {
                if m.deleted_at.is_none() {
                    m.deleted_at = Some(now);
                }
            }
        }
        inner.tombstoned.insert(conversation_id);
        Ok(())
    }

    async fn unread_total(&self, user: Uuid) -> AppResult<i64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .conversations
            .values()
            .filter(|c| !inner.tombstoned.contains(&c.id))
            .filter_map(|c| c.unread_for(user))
            .map(i64::from)
            .sum())
    }
}
