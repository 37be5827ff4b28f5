use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Read-only account-status snapshot owned by the identity collaborator.
/// Fetched per sensitive operation, never cached long-term: a stale snapshot
/// could let a suspended account keep messaging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub id: Uuid,
    pub is_active: bool,
    pub is_suspended: bool,
    pub premium_until: Option<DateTime<Utc>>,
}

impl AccountSnapshot {
    /// Entitlement is always expiry-gated: a premium flag without a future
    /// expiry does not grant messaging.
    pub fn is_entitled(&self, now: DateTime<Utc>) -> bool {
        matches!(self.premium_until, Some(until) if until > now)
    }

    pub fn is_usable(&self) -> bool {
        self.is_active && !self.is_suspended
    }
}
