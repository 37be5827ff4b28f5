use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::AccountSnapshot;

pub mod memory;
pub mod postgres;

pub use memory::MemoryAccountDirectory;
pub use postgres::PgAccountDirectory;

/// External identity/account collaborator. The messaging core never owns
/// account records; it consumes point-in-time status snapshots and pushes
/// best-effort presence updates back.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Fresh account-status snapshot, fetched per sensitive operation.
    async fn snapshot(&self, user: Uuid) -> AppResult<Option<AccountSnapshot>>;

    /// Record that the user has no live connections left. Callers treat a
    /// failure here as non-fatal.
    async fn mark_offline(&self, user: Uuid) -> AppResult<()>;
}
