use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    accounts::AccountDirectory, config::Config, lifecycle::InFlightCounter,
    presence::PresenceRegistry, storage::ChatStore,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub accounts: Arc<dyn AccountDirectory>,
    pub presence: PresenceRegistry,
    pub config: Arc<Config>,
    pub in_flight: InFlightCounter,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ChatStore>,
        accounts: Arc<dyn AccountDirectory>,
        config: Arc<Config>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            accounts,
            presence: PresenceRegistry::new(),
            config,
            in_flight: InFlightCounter::new(),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Flip the process-wide shutdown flag. Connection tasks and the reaper
    /// observe it and wind down; repeated calls are harmless.
    pub fn begin_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Subscribe to the shutdown flag. Late subscribers must observe the
    /// current value too, so watch with `wait_for(|stop| *stop)` rather than
    /// `changed()` alone.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}
