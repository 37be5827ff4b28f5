use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::accounts::AccountDirectory;
use crate::presence::reaper;
use crate::state::AppState;

/// Count of sends past validation but not yet committed/fanned out. The
/// shutdown drain waits on this; there is no cancellable send.
#[derive(Clone, Default)]
pub struct InFlightCounter(Arc<AtomicUsize>);

impl InFlightCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> InFlightGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(self.0.clone())
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns the background tasks started at boot and the drain sequence run at
/// shutdown: stop the reaper, mark every tracked user offline (best-effort,
/// all attempted), then give in-flight sends a bounded grace period. The
/// shutdown flag itself lives on `AppState` so connection tasks can observe
/// it too.
pub struct Lifecycle {
    reaper: JoinHandle<()>,
}

impl Lifecycle {
    pub fn start(state: &AppState) -> Self {
        let reaper = reaper::spawn(
            state.presence.clone(),
            state.accounts.clone(),
            state.config.reaper_interval,
            state.shutdown_signal(),
        );
        Self { reaper }
    }

    pub async fn shutdown(self, state: &AppState) {
        state.begin_shutdown();
        if let Err(e) = self.reaper.await {
            if !e.is_cancelled() {
                tracing::warn!(error = %e, "reaper task ended abnormally");
            }
        }

        let users = state.presence.users().await;
        tracing::info!(users = users.len(), "marking tracked users offline");
        for user in users {
            if let Err(e) = state.accounts.mark_offline(user).await {
                tracing::warn!(%user, error = %e, "failed to mark user offline during drain");
            }
        }

        if let Err(_elapsed) = tokio::time::timeout(
            state.config.shutdown_grace,
            wait_for_drain(&state.in_flight),
        )
        .await
        {
            tracing::warn!(
                remaining = state.in_flight.count(),
                "shutdown grace expired with sends still in flight"
            );
        }
        tracing::info!("drain complete");
    }
}

async fn wait_for_drain(in_flight: &InFlightCounter) {
    while in_flight.count() > 0 {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_flight_guard_counts_down_on_drop() {
        let counter = InFlightCounter::new();
        assert_eq!(counter.count(), 0);
        let a = counter.begin();
        let b = counter.begin();
        assert_eq!(counter.count(), 2);
        drop(a);
        assert_eq!(counter.count(), 1);
        drop(b);
        assert_eq!(counter.count(), 0);
    }
}
