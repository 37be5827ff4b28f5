use std::sync::Arc;

use parley_service::accounts::MemoryAccountDirectory;
use parley_service::config::Config;
use parley_service::state::AppState;
use parley_service::storage::MemoryChatStore;
use tokio::sync::mpsc::UnboundedReceiver;

pub struct TestEnv {
    pub state: AppState,
    pub accounts: Arc<MemoryAccountDirectory>,
}

/// App state wired to in-memory backends, no database required.
pub fn test_env() -> TestEnv {
    let store = Arc::new(MemoryChatStore::new());
    let accounts = Arc::new(MemoryAccountDirectory::new());
    let state = AppState::new(store, accounts.clone(), Arc::new(Config::test_defaults()));
    TestEnv { state, accounts }
}

/// Drain one already-enqueued event from a connection's outbound channel.
#[allow(dead_code)]
pub fn next_event(rx: &mut UnboundedReceiver<String>) -> Option<serde_json::Value> {
    rx.try_recv().ok().map(|payload| {
        serde_json::from_str(&payload).expect("outbound payload should be valid JSON")
    })
}

#[allow(dead_code)]
pub fn drain_events(rx: &mut UnboundedReceiver<String>) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    while let Some(event) = next_event(rx) {
        out.push(event);
    }
    out
}
