use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::accounts::AccountDirectory;
use crate::config::Config;
use crate::error::AppError;
use crate::models::AccountSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: String,
    /// Expiry, unix seconds.
    pub exp: i64,
}

/// Validate a bearer credential and extract the user id. Signature and
/// expiry only; account status is checked separately because a credential
/// stays cryptographically valid after suspension.
pub fn verify_token(config: &Config, token: &str) -> Result<Uuid, AppError> {
    let secret = config
        .jwt_secret
        .as_deref()
        .ok_or(AppError::ServerMisconfigured)?;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::ExpiredCredential,
        _ => AppError::InvalidCredential,
    })?;

    Uuid::parse_str(&data.claims.sub).map_err(|_| AppError::InvalidCredential)
}

/// Connection-time authentication: credential check plus a fresh
/// account-status snapshot. Any failure refuses the connection before it
/// enters the presence registry or receives a command.
pub async fn authenticate(
    config: &Config,
    accounts: &dyn AccountDirectory,
    credential: Option<&str>,
) -> Result<AccountSnapshot, AppError> {
    let token = credential.ok_or(AppError::MissingCredential)?;
    let user_id = verify_token(config, token)?;

    let snapshot = accounts
        .snapshot(user_id)
        .await?
        .ok_or(AppError::AccountNotFound)?;
    if snapshot.is_suspended {
        return Err(AppError::AccountSuspended);
    }
    if !snapshot.is_active {
        return Err(AppError::AccountInactive);
    }
    Ok(snapshot)
}

#[cfg(test)]
pub fn mint_token(config: &Config, user_id: Uuid, ttl_secs: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims {
        sub: user_id.to_string(),
        exp: chrono::Utc::now().timestamp() + ttl_secs,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_deref().unwrap().as_bytes()),
    )
    .expect("failed to sign test token")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::MemoryAccountDirectory;

    #[tokio::test]
    async fn missing_credential_is_refused() {
        let config = Config::test_defaults();
        let accounts = MemoryAccountDirectory::new();
        let err = authenticate(&config, &accounts, None).await.unwrap_err();
        assert!(matches!(err, AppError::MissingCredential));
    }

    #[tokio::test]
    async fn garbage_credential_is_refused() {
        let config = Config::test_defaults();
        let accounts = MemoryAccountDirectory::new();
        let err = authenticate(&config, &accounts, Some("not-a-jwt"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidCredential));
    }

    #[tokio::test]
    async fn expired_credential_is_refused() {
        let config = Config::test_defaults();
        let accounts = MemoryAccountDirectory::new();
        let user = accounts.add_entitled_user().await;
        let token = mint_token(&config, user, -3600);
        let err = authenticate(&config, &accounts, Some(&token))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExpiredCredential));
    }

    #[tokio::test]
    async fn unknown_account_is_refused() {
        let config = Config::test_defaults();
        let accounts = MemoryAccountDirectory::new();
        let token = mint_token(&config, Uuid::new_v4(), 3600);
        let err = authenticate(&config, &accounts, Some(&token))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AccountNotFound));
    }

    #[tokio::test]
    async fn suspended_account_is_refused_despite_valid_token() {
        let config = Config::test_defaults();
        let accounts = MemoryAccountDirectory::new();
        let user = accounts.add_entitled_user().await;
        accounts.suspend(user).await;
        let token = mint_token(&config, user, 3600);
        let err = authenticate(&config, &accounts, Some(&token))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AccountSuspended));
    }

    #[tokio::test]
    async fn inactive_account_is_refused() {
        let config = Config::test_defaults();
        let accounts = MemoryAccountDirectory::new();
        let user = accounts.add_entitled_user().await;
        accounts.deactivate(user).await;
        let token = mint_token(&config, user, 3600);
        let err = authenticate(&config, &accounts, Some(&token))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AccountInactive));
    }

    #[tokio::test]
    async fn missing_secret_is_a_server_side_refusal() {
        let mut config = Config::test_defaults();
        config.jwt_secret = None;
        let accounts = MemoryAccountDirectory::new();
        let err = authenticate(&config, &accounts, Some("anything"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ServerMisconfigured));
    }

    #[tokio::test]
    async fn healthy_account_passes() {
        let config = Config::test_defaults();
        let accounts = MemoryAccountDirectory::new();
        let user = accounts.add_entitled_user().await;
        let token = mint_token(&config, user, 3600);
        let snapshot = authenticate(&config, &accounts, Some(&token))
            .await
            .unwrap();
        assert_eq!(snapshot.id, user);
    }
}
