use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::guards::User;
use crate::models::{Message, MessageKind};
use crate::services::message_service::{MessagePipeline, SendRequest};
use crate::services::read_state_service::ReadStateService;
use crate::state::AppState;
use crate::storage::ChatStore;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
    pub correlation_id: Option<String>,
}

pub async fn send_message(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let request = SendRequest {
        conversation_id: Some(id),
        receiver_id: None,
        content: body.content,
        kind: body.kind,
        correlation_id: body.correlation_id.clone(),
    };
    let result = MessagePipeline::send(&state, user.id, request).await;
    let (conversation, message) = match result {
        Ok(ok) => ok,
        Err(e) => {
            crate::metrics::MESSAGES_REJECTED_TOTAL
                .with_label_values(&[e.reason()])
                .inc();
            return Err(e);
        }
    };
    MessagePipeline::fan_out(
        &state.presence,
        &conversation,
        &message,
        body.correlation_id,
        None,
    )
    .await;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
    pub before: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<Message>,
}

/// Chronological history page, oldest first within the page. `before` walks
/// backwards through older pages.
pub async fn get_message_history(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> AppResult<Json<HistoryResponse>> {
    crate::services::conversation_service::ConversationService::authorize(
        &*state.store,
        id,
        user.id,
    )
    .await?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let messages = state.store.messages_for(id, limit, params.before).await?;
    Ok(Json(HistoryResponse { messages }))
}

/// Sender-only soft delete.
pub async fn delete_message(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let message = state.store.message(id).await?.ok_or(AppError::NotFound)?;
    if message.sender_id != user.id {
        return Err(AppError::NotAParticipant);
    }
    state.store.soft_delete_message(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct UnreadTotalResponse {
    pub unread: i64,
}

pub async fn get_unread_total(
    State(state): State<AppState>,
    user: User,
) -> AppResult<Json<UnreadTotalResponse>> {
    let unread = ReadStateService::unread_total(&*state.store, user.id).await?;
    Ok(Json(UnreadTotalResponse { unread }))
}
