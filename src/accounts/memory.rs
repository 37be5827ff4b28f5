use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::accounts::AccountDirectory;
use crate::error::{AppError, AppResult};
use crate::models::AccountSnapshot;

/// In-memory account directory for tests.
#[derive(Default)]
pub struct MemoryAccountDirectory {
    accounts: Mutex<HashMap<Uuid, AccountSnapshot>>,
    offline_marks: Mutex<Vec<Uuid>>,
    fail_offline: Mutex<bool>,
}

impl MemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, snapshot: AccountSnapshot) {
        self.accounts.lock().await.insert(snapshot.id, snapshot);
    }

    /// Register a healthy, entitled account and return its id.
    pub async fn add_entitled_user(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.insert(AccountSnapshot {
            id,
            is_active: true,
            is_suspended: false,
            premium_until: Some(Utc::now() + Duration::days(30)),
        })
        .await;
        id
    }

    /// Register a healthy account without the messaging entitlement.
    pub async fn add_free_user(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.insert(AccountSnapshot {
            id,
            is_active: true,
            is_suspended: false,
            premium_until: None,
        })
        .await;
        id
    }

    pub async fn suspend(&self, user: Uuid) {
        if let Some(account) = self.accounts.lock().await.get_mut(&user) {
            account.is_suspended = true;
        }
    }

    pub async fn deactivate(&self, user: Uuid) {
        if let Some(account) = self.accounts.lock().await.get_mut(&user) {
            account.is_active = false;
        }
    }

    /// Make subsequent `mark_offline` calls fail, to exercise the
    /// best-effort paths.
    pub async fn fail_offline_marks(&self, fail: bool) {
        *self.fail_offline.lock().await = fail;
    }

    pub async fn offline_marks(&self) -> Vec<Uuid> {
        self.offline_marks.lock().await.clone()
    }
}

#[async_trait]
impl AccountDirectory for MemoryAccountDirectory {
    async fn snapshot(&self, user: Uuid) -> AppResult<Option<AccountSnapshot>> {
        Ok(self.accounts.lock().await.get(&user).cloned())
    }

    async fn mark_offline(&self, user: Uuid) -> AppResult<()> {
        if *self.fail_offline.lock().await {
            return Err(AppError::Internal);
        }
        self.offline_marks.lock().await.push(user);
        Ok(())
    }
}
