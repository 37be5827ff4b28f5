use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::conversation::normalize_pair;
use crate::models::message::preview_of;
use crate::models::{Conversation, LastMessage, Message, MessageKind, NewMessage, UnreadCounters};
use crate::storage::ChatStore;

const CONVERSATION_COLS: &str = "id, user_low, user_high, blocked_by, unread_low, unread_high, \
     last_message_preview, last_message_sender, last_message_kind, last_message_at, \
     created_at, last_activity_at";

const MESSAGE_COLS: &str =
    "id, conversation_id, sender_id, receiver_id, content, kind, is_read, read_at, deleted_at, created_at";

pub struct PgChatStore {
    pool: Pool<Postgres>,
}

impl PgChatStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn conversation_from_row(row: &PgRow) -> Conversation {
    let preview: Option<String> = row.get("last_message_preview");
    let sender: Option<Uuid> = row.get("last_message_sender");
    let kind: Option<String> = row.get("last_message_kind");
    let sent_at: Option<DateTime<Utc>> = row.get("last_message_at");
    let last_message = match (preview, sender, sent_at) {
        (Some(preview), Some(sender_id), Some(sent_at)) => Some(LastMessage {
            preview,
            sender_id,
            kind: kind.as_deref().map(MessageKind::parse).unwrap_or_default(),
            sent_at,
        }),
        _ => None,
    };
    Conversation {
        id: row.get("id"),
        user_low: row.get("user_low"),
        user_high: row.get("user_high"),
        blocked_by: row.get("blocked_by"),
        unread: UnreadCounters {
            low: row.get("unread_low"),
            high: row.get("unread_high"),
        },
        last_message,
        created_at: row.get("created_at"),
        last_activity_at: row.get("last_activity_at"),
    }
}

fn message_from_row(row: &PgRow) -> Message {
    let kind: String = row.get("kind");
    Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sender_id: row.get("sender_id"),
        receiver_id: row.get("receiver_id"),
        content: row.get("content"),
        kind: MessageKind::parse(&kind),
        is_read: row.get("is_read"),
        read_at: row.get("read_at"),
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn get_or_create_conversation(&self, a: Uuid, b: Uuid) -> AppResult<Conversation> {
        let (low, high) = normalize_pair(a, b);

        let existing = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLS}, deleted_at FROM conversations WHERE user_low = $1 AND user_high = $2"
        ))
        .bind(low)
        .bind(high)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            let deleted_at: Option<DateTime<Utc>> = row.get("deleted_at");
            let conv = conversation_from_row(&row);
            if deleted_at.is_some() {
                // a deleted conversation under someone's block stays deleted
                if conv.is_blocked() {
                    return Err(AppError::ConversationBlocked);
                }
                sqlx::query("UPDATE conversations SET deleted_at = NULL WHERE id = $1")
                    .bind(conv.id)
                    .execute(&self.pool)
                    .await?;
            }
            return Ok(conv);
        }

        // The unique pair constraint resolves the create/create race: losers
        // hit the conflict, do nothing, and reread the winner's row.
        sqlx::query(
            "INSERT INTO conversations (id, user_low, user_high) VALUES ($1, $2, $3) \
             ON CONFLICT (user_low, user_high) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(low)
        .bind(high)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLS} FROM conversations WHERE user_low = $1 AND user_high = $2"
        ))
        .bind(low)
        .bind(high)
        .fetch_one(&self.pool)
        .await?;
        Ok(conversation_from_row(&row))
    }

    async fn conversation(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLS} FROM conversations WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn conversations_for(&self, user: Uuid) -> AppResult<Vec<Conversation>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLS} FROM conversations \
             WHERE (user_low = $1 OR user_high = $1) AND deleted_at IS NULL \
             ORDER BY last_activity_at DESC \
             LIMIT 100"
        ))
        .bind(user)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(conversation_from_row).collect())
    }

    async fn set_blocked(&self, id: Uuid, actor: Uuid, blocked: bool) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        // Row lock makes the block transition the serialization point; two
        // racing blockers resolve to one winner and one ConversationBlocked.
        let row = sqlx::query(
            "SELECT blocked_by FROM conversations WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound)?;
        let current: Option<Uuid> = row.get("blocked_by");

        let next = match (blocked, current) {
            (true, None) => Some(Some(actor)),
            (true, Some(blocker)) if blocker == actor => None,
            (false, Some(blocker)) if blocker == actor => Some(None),
            (false, None) => None,
            _ => return Err(AppError::ConversationBlocked),
        };
        if let Some(value) = next {
            sqlx::query("UPDATE conversations SET blocked_by = $1 WHERE id = $2")
                .bind(value)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn record_message(&self, new: NewMessage) -> AppResult<Message> {
        let mut tx = self.pool.begin().await?;

        // Lock the conversation row so the summary, the unread counter and
        // the message row all reflect the same message.
        let row = sqlx::query(
            "SELECT user_low, user_high FROM conversations \
             WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(new.conversation_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound)?;

        let user_low: Uuid = row.get("user_low");
        let user_high: Uuid = row.get("user_high");
        let receiver_col = if new.receiver_id == user_low {
            "unread_low"
        } else if new.receiver_id == user_high {
            "unread_high"
        } else {
            return Err(AppError::NotAParticipant);
        };
        if new.sender_id != user_low && new.sender_id != user_high {
            return Err(AppError::NotAParticipant);
        }

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, content, kind, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(new.id)
        .bind(new.conversation_id)
        .bind(new.sender_id)
        .bind(new.receiver_id)
        .bind(&new.content)
        .bind(new.kind.as_str())
        .bind(new.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "UPDATE conversations SET \
                {receiver_col} = {receiver_col} + 1, \
                last_message_preview = $1, \
                last_message_sender = $2, \
                last_message_kind = $3, \
                last_message_at = $4, \
                last_activity_at = $4 \
             WHERE id = $5"
        ))
        .bind(preview_of(&new.content))
        .bind(new.sender_id)
        .bind(new.kind.as_str())
        .bind(new.created_at)
        .bind(new.conversation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(new.into_message())
    }

    async fn message(&self, id: Uuid) -> AppResult<Option<Message>> {
        let row = sqlx::query(&format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(message_from_row))
    }

    async fn messages_for(
        &self,
        conversation_id: Uuid,
        limit: i64,
        before: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<Message>> {
        let limit = limit.clamp(1, 200);
        // Page backwards by fetching the newest slice, then flip to
        // ascending (created_at, id) order for the caller.
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLS} FROM ( \
                SELECT {MESSAGE_COLS} FROM messages \
                WHERE conversation_id = $1 \
                  AND deleted_at IS NULL \
                  AND ($2::timestamptz IS NULL OR created_at < $2) \
                ORDER BY created_at DESC, id DESC \
                LIMIT $3 \
             ) newest ORDER BY created_at ASC, id ASC"
        ))
        .bind(conversation_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    async fn mark_read(
        &self,
        conversation_id: Uuid,
        reader: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<u64> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT user_low, user_high FROM conversations \
             WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(conversation_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound)?;

        let user_low: Uuid = row.get("user_low");
        let user_high: Uuid = row.get("user_high");
        let reader_col = if reader == user_low {
            "unread_low"
        } else if reader == user_high {
            "unread_high"
        } else {
            return Err(AppError::NotAParticipant);
        };

        let result = sqlx::query(
            "UPDATE messages SET is_read = TRUE, read_at = $1 \
             WHERE conversation_id = $2 AND receiver_id = $3 \
               AND is_read = FALSE AND deleted_at IS NULL",
        )
        .bind(at)
        .bind(conversation_id)
        .bind(reader)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "UPDATE conversations SET {reader_col} = 0 WHERE id = $1"
        ))
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn soft_delete_message(&self, message_id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE messages SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn delete_conversation(&self, conversation_id: Uuid) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let result =
            sqlx::query("UPDATE conversations SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL")
                .bind(conversation_id)
                .execute(&mut *tx)
                .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        sqlx::query(
            "UPDATE messages SET deleted_at = NOW() WHERE conversation_id = $1 AND deleted_at IS NULL",
        )
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn unread_total(&self, user: Uuid) -> AppResult<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(CASE WHEN user_low = $1 THEN unread_low ELSE unread_high END)::bigint \
             FROM conversations \
             WHERE (user_low = $1 OR user_high = $1) AND deleted_at IS NULL",
        )
        .bind(user)
        .fetch_one(&self.pool)
        .await?;
        Ok(total.unwrap_or(0))
    }
}
