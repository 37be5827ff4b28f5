use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

pub mod conversations;
pub mod messages;

use conversations::{
    block_conversation, create_conversation, delete_conversation, get_conversation,
    list_conversations, mark_as_read, unblock_conversation,
};
use messages::{delete_message, get_message_history, get_unread_total, send_message};

pub fn build_router(state: AppState) -> Router {
    // Introspection endpoints stay public for healthchecks and scrapers.
    let introspection = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(crate::metrics::metrics_handler));

    let api_v1 = Router::new()
        .route(
            "/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/conversations/:id",
            get(get_conversation).delete(delete_conversation),
        )
        .route(
            "/conversations/:id/messages",
            get(get_message_history).post(send_message),
        )
        .route("/conversations/:id/read", post(mark_as_read))
        .route("/conversations/:id/block", post(block_conversation))
        .route("/conversations/:id/block", delete(unblock_conversation))
        .route("/messages/:id", delete(delete_message))
        .route("/unread", get(get_unread_total))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::auth_middleware,
        ));

    // The websocket upgrade authenticates inside the handler (the credential
    // may arrive as a query parameter), so it sits outside the auth layer.
    Router::new()
        .merge(introspection)
        .nest("/api/v1", api_v1)
        .route("/ws", get(crate::websocket::handlers::ws_handler))
        .layer(middleware::from_fn(crate::metrics::track_http_metrics))
        .with_state(state)
}
