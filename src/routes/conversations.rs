use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::guards::User;
use crate::models::{Conversation, LastMessage};
use crate::services::conversation_service::ConversationService;
use crate::services::read_state_service::ReadStateService;
use crate::state::AppState;
use crate::storage::ChatStore;

/// A conversation shaped for one viewer: the counterpart is named and only
/// the viewer's own unread counter is exposed.
#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub counterpart: Uuid,
    pub blocked: bool,
    pub blocked_by_me: bool,
    pub unread: i32,
    pub last_message: Option<LastMessage>,
    pub last_activity_at: chrono::DateTime<chrono::Utc>,
}

impl ConversationResponse {
    pub fn for_viewer(conv: &Conversation, viewer: Uuid) -> Self {
        Self {
            id: conv.id,
            counterpart: conv.other_participant(viewer).unwrap_or(viewer),
            blocked: conv.is_blocked(),
            blocked_by_me: conv.blocked_by == Some(viewer),
            unread: conv.unread_for(viewer).unwrap_or(0),
            last_message: conv.last_message.clone(),
            last_activity_at: conv.last_activity_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub receiver_id: Uuid,
}

pub async fn create_conversation(
    State(state): State<AppState>,
    user: User,
    Json(body): Json<CreateConversationRequest>,
) -> AppResult<(StatusCode, Json<ConversationResponse>)> {
    let conv =
        ConversationService::get_or_create(&*state.store, user.id, body.receiver_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ConversationResponse::for_viewer(&conv, user.id)),
    ))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    user: User,
) -> AppResult<Json<Vec<ConversationResponse>>> {
    let conversations = state.store.conversations_for(user.id).await?;
    Ok(Json(
        conversations
            .iter()
            .map(|c| ConversationResponse::for_viewer(c, user.id))
            .collect(),
    ))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ConversationResponse>> {
    let conv = ConversationService::authorize(&*state.store, id, user.id).await?;
    Ok(Json(ConversationResponse::for_viewer(&conv, user.id)))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    ConversationService::delete(&*state.store, id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct MarkAsReadResponse {
    pub marked: u64,
}

pub async fn mark_as_read(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MarkAsReadResponse>> {
    let marked = ReadStateService::mark_read(&state, id, user.id).await?;
    Ok(Json(MarkAsReadResponse { marked }))
}

pub async fn block_conversation(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ConversationResponse>> {
    let conv = ConversationService::set_blocked(&*state.store, id, user.id, true).await?;
    Ok(Json(ConversationResponse::for_viewer(&conv, user.id)))
}

pub async fn unblock_conversation(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ConversationResponse>> {
    let conv = ConversationService::set_blocked(&*state.store, id, user.id, false).await?;
    Ok(Json(ConversationResponse::for_viewer(&conv, user.id)))
}
