use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// HS256 signing secret for connection credentials. Kept optional so a
    /// misconfigured deployment refuses connections with a distinct reason
    /// instead of failing to boot.
    pub jwt_secret: Option<String>,
    pub db_max_connections: u32,
    /// Maximum length of a message after trimming, in characters.
    pub max_message_chars: usize,
    pub reaper_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| crate::error::AppError::Config("DATABASE_URL missing".into()))?;
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);
        let jwt_secret = env::var("JWT_SECRET").ok().filter(|s| !s.trim().is_empty());
        if jwt_secret.is_none() {
            tracing::warn!("JWT_SECRET not set; all connections will be refused");
        }
        let db_max_connections = env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        let max_message_chars = env::var("MAX_MESSAGE_CHARS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(4000);
        let reaper_interval_secs: u64 = env::var("REAPER_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);
        let shutdown_grace_secs: u64 = env::var("SHUTDOWN_GRACE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            database_url,
            port,
            jwt_secret,
            db_max_connections,
            max_message_chars,
            reaper_interval: Duration::from_secs(reaper_interval_secs),
            shutdown_grace: Duration::from_secs(shutdown_grace_secs),
        })
    }

    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/parley_test".into(),
            port: 3000,
            jwt_secret: Some("test-secret".into()),
            db_max_connections: 5,
            max_message_chars: 4000,
            reaper_interval: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(1),
        }
    }
}
