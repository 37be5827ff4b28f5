use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    // Connection-time refusals. A credential can stay cryptographically
    // valid after suspension, so account status is re-verified at connect.
    #[error("missing credential")]
    MissingCredential,

    #[error("invalid credential")]
    InvalidCredential,

    #[error("expired credential")]
    ExpiredCredential,

    #[error("account not found")]
    AccountNotFound,

    #[error("account suspended")]
    AccountSuspended,

    #[error("account inactive")]
    AccountInactive,

    #[error("server misconfigured")]
    ServerMisconfigured,

    // Validation failures: reported to the caller, no side effects.
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("message content is empty")]
    EmptyContent,

    #[error("message content exceeds {max} characters")]
    ContentTooLong { max: usize },

    #[error("cannot open a conversation with yourself")]
    SelfConversation,

    // Authorization failures: reported, no side effects.
    #[error("not a participant of this conversation")]
    NotAParticipant,

    #[error("conversation is blocked")]
    ConversationBlocked,

    #[error("messaging entitlement required")]
    NotEntitled,

    #[error("not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal server error")]
    Internal,
}

impl AppError {
    /// Stable wire-level reason code, echoed in `error` / `message.rejected`
    /// events so clients can react to a specific failure.
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::Config(_) | AppError::StartServer(_) => "internal",
            AppError::MissingCredential => "missing_credential",
            AppError::InvalidCredential => "invalid_credential",
            AppError::ExpiredCredential => "expired_credential",
            AppError::AccountNotFound => "account_not_found",
            AppError::AccountSuspended => "account_suspended",
            AppError::AccountInactive => "account_inactive",
            AppError::ServerMisconfigured => "server_misconfigured",
            AppError::BadRequest(_) => "bad_request",
            AppError::EmptyContent => "empty_content",
            AppError::ContentTooLong { .. } => "content_too_long",
            AppError::SelfConversation => "self_conversation",
            AppError::NotAParticipant => "not_a_participant",
            AppError::ConversationBlocked => "conversation_blocked",
            AppError::NotEntitled => "not_entitled",
            AppError::NotFound => "not_found",
            AppError::Database(_) | AppError::Internal => "internal",
        }
    }

    /// True for refusals that must abort a connection before it enters the
    /// presence registry.
    pub fn refuses_connection(&self) -> bool {
        matches!(
            self,
            AppError::MissingCredential
                | AppError::InvalidCredential
                | AppError::ExpiredCredential
                | AppError::AccountNotFound
                | AppError::AccountSuspended
                | AppError::AccountInactive
                | AppError::ServerMisconfigured
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingCredential
            | AppError::InvalidCredential
            | AppError::ExpiredCredential => StatusCode::UNAUTHORIZED,
            AppError::AccountNotFound
            | AppError::AccountSuspended
            | AppError::AccountInactive => StatusCode::FORBIDDEN,
            AppError::ServerMisconfigured => StatusCode::SERVICE_UNAVAILABLE,
            AppError::BadRequest(_)
            | AppError::EmptyContent
            | AppError::ContentTooLong { .. }
            | AppError::SelfConversation => StatusCode::BAD_REQUEST,
            AppError::NotAParticipant
            | AppError::ConversationBlocked
            | AppError::NotEntitled => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Internal failures are reported generically; the detail stays in
        // the logs.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error");
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        (
            status,
            Json(json!({ "error": message, "reason": self.reason() })),
        )
            .into_response()
    }
}
