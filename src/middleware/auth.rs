use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::AppError;
use crate::gateway;
use crate::state::AppState;

/// Extract the bearer credential, verify it and stash the user id in the
/// request extensions for the `User` guard. Applied to every /api/v1 route;
/// the websocket upgrade authenticates on its own because its credential may
/// arrive as a query parameter.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::MissingCredential)?;

    let user_id = gateway::verify_token(&state.config, token)?;
    req.extensions_mut().insert(user_id);

    Ok(next.run(req).await)
}
