//! Typed extraction of the authenticated caller, so a handler cannot be
//! wired up without going through authentication first.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;

/// The authenticated user, placed in request extensions by the auth
/// middleware.
#[derive(Debug, Clone, Copy)]
pub struct User {
    pub id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for User
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .extensions
            .get::<Uuid>()
            .copied()
            .ok_or(AppError::MissingCredential)?;
        Ok(User { id })
    }
}
