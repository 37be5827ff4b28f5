use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use crate::accounts::AccountDirectory;
use crate::error::AppResult;
use crate::models::AccountSnapshot;

pub struct PgAccountDirectory {
    pool: Pool<Postgres>,
}

impl PgAccountDirectory {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountDirectory for PgAccountDirectory {
    async fn snapshot(&self, user: Uuid) -> AppResult<Option<AccountSnapshot>> {
        let row = sqlx::query(
            "SELECT id, is_active, is_suspended, premium_until FROM accounts WHERE id = $1",
        )
        .bind(user)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| AccountSnapshot {
            id: r.get("id"),
            is_active: r.get("is_active"),
            is_suspended: r.get("is_suspended"),
            premium_until: r.get("premium_until"),
        }))
    }

    async fn mark_offline(&self, user: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE accounts SET last_seen_at = NOW() WHERE id = $1")
            .bind(user)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
