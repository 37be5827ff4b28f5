use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::websocket::message_types::ServerEvent;

pub mod reaper;

/// One live connection for one user session/device. The handle id is unique
/// per connection; a reconnect always produces a new handle.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub user_id: Uuid,
    sender: UnboundedSender<String>,
    subscriptions: Arc<RwLock<HashSet<Uuid>>>,
}

impl ConnectionHandle {
    /// Build a handle and the receiving end its socket task drains.
    pub fn new(user_id: Uuid) -> (Self, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                user_id,
                sender: tx,
                subscriptions: Arc::new(RwLock::new(HashSet::new())),
            },
            rx,
        )
    }

    /// Liveness oracle: the channel closes when the socket task is gone,
    /// including ungraceful disconnects once the task notices the dead peer.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Serialize and enqueue an event. Returns false if the connection is
    /// gone; delivery failures never propagate to the caller's operation.
    pub fn send(&self, event: &ServerEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(payload) => self.sender.send(payload).is_ok(),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize server event");
                false
            }
        }
    }

    pub async fn subscribe(&self, conversation_id: Uuid) {
        self.subscriptions.write().await.insert(conversation_id);
    }

    pub async fn unsubscribe(&self, conversation_id: Uuid) {
        self.subscriptions.write().await.remove(&conversation_id);
    }

    pub async fn is_subscribed(&self, conversation_id: Uuid) -> bool {
        self.subscriptions.read().await.contains(&conversation_id)
    }
}

/// Process-wide map from user identity to that user's live handles. This is
/// the single piece of shared mutable state in the core; one coarse lock
/// serializes register/unregister/reap so transitions are never double
/// counted. Invariant: a user has an entry iff their handle set is non-empty.
#[derive(Default, Clone)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Vec<ConnectionHandle>>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handle. Returns true on the 0→1 transition, which is the only
    /// point the caller broadcasts "went online".
    pub async fn register(&self, handle: ConnectionHandle) -> bool {
        let mut guard = self.inner.write().await;
        let handles = guard.entry(handle.user_id).or_default();
        let was_offline = handles.is_empty();
        handles.push(handle);
        was_offline
    }

    /// Remove a handle by id. Returns the number of handles the user still
    /// has; 0 means the caller broadcasts "went offline".
    pub async fn unregister(&self, user_id: Uuid, handle_id: Uuid) -> usize {
        let mut guard = self.inner.write().await;
        let remaining = match guard.get_mut(&user_id) {
            Some(handles) => {
                handles.retain(|h| h.id != handle_id);
                handles.len()
            }
            None => 0,
        };
        if remaining == 0 {
            guard.remove(&user_id);
        }
        remaining
    }

    /// Reaper removal: re-checks liveness inside the write lock immediately
    /// before removing, so a handle observed dead during the sweep but alive
    /// again here is left alone, and a handle that reconnected meanwhile
    /// (new handle id) is never touched. Returns the remaining count, or
    /// None when nothing was removed.
    pub async fn remove_if_dead(&self, user_id: Uuid, handle_id: Uuid) -> Option<usize> {
        let mut guard = self.inner.write().await;
        let handles = guard.get_mut(&user_id)?;
        let target = handles.iter().position(|h| h.id == handle_id)?;
        if handles[target].is_alive() {
            return None;
        }
        handles.remove(target);
        let remaining = handles.len();
        if remaining == 0 {
            guard.remove(&user_id);
        }
        Some(remaining)
    }

    /// Snapshot copy of a user's live handles, safe to iterate while the
    /// registry keeps mutating.
    pub async fn handles_for(&self, user_id: Uuid) -> Vec<ConnectionHandle> {
        let guard = self.inner.read().await;
        guard.get(&user_id).cloned().unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        let guard = self.inner.read().await;
        guard.contains_key(&user_id)
    }

    /// Full copy for diagnostics, the reaper sweep and shutdown drain.
    pub async fn snapshot(&self) -> HashMap<Uuid, Vec<ConnectionHandle>> {
        self.inner.read().await.clone()
    }

    pub async fn users(&self) -> Vec<Uuid> {
        self.inner.read().await.keys().copied().collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.values().map(Vec::len).sum()
    }

    /// Deliver a presence transition to every connection except the
    /// transitioning user's own.
    pub async fn broadcast_presence(&self, user_id: Uuid, online: bool) {
        let event = ServerEvent::PresenceChanged { user_id, online };
        let snapshot = self.snapshot().await;
        for (other, handles) in snapshot {
            if other == user_id {
                continue;
            }
            for handle in handles {
                handle.send(&event);
            }
        }
    }
}
