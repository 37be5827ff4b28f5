use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::accounts::AccountDirectory;
use crate::presence::PresenceRegistry;

/// Periodic reconciliation of the presence registry against the liveness
/// oracle. Normal disconnects unregister themselves; the reaper corrects
/// drift from silent disconnects (network loss, crash) that never produce a
/// close event.
pub fn spawn(
    registry: PresenceRegistry,
    accounts: Arc<dyn AccountDirectory>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = sweep(&registry, accounts.as_ref()).await;
                    if reaped > 0 {
                        tracing::info!(reaped, "reaped stale connections");
                        crate::metrics::PRESENCE_REAPED_TOTAL.inc_by(reaped as u64);
                    }
                }
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                    tracing::debug!("reaper stopping");
                    return;
                }
            }
        }
    })
}

/// One reconciliation pass. Works on a snapshot, so connections arriving
/// mid-sweep are untouched; removal itself re-checks liveness under the
/// registry lock. Returns the number of handles removed.
pub async fn sweep(registry: &PresenceRegistry, accounts: &dyn AccountDirectory) -> usize {
    let snapshot = registry.snapshot().await;
    let mut reaped = 0;

    for (user_id, handles) in snapshot {
        for handle in handles {
            if handle.is_alive() {
                continue;
            }
            let Some(remaining) = registry.remove_if_dead(user_id, handle.id).await else {
                continue;
            };
            reaped += 1;
            crate::metrics::WS_CONNECTIONS.dec();
            tracing::debug!(%user_id, handle_id = %handle.id, "removed dead handle");
            if remaining == 0 {
                crate::metrics::ONLINE_USERS.dec();
                registry.broadcast_presence(user_id, false).await;
                // External presence sync is best-effort: a failure must not
                // abort the sweep or block registry cleanup.
                if let Err(e) = accounts.mark_offline(user_id).await {
                    tracing::warn!(%user_id, error = %e, "failed to mark user offline");
                }
            }
        }
    }
    reaped
}
