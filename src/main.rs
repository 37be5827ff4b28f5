use std::sync::Arc;

use parley_service::accounts::postgres::PgAccountDirectory;
use parley_service::lifecycle::Lifecycle;
use parley_service::state::AppState;
use parley_service::storage::PgChatStore;
use parley_service::{config, db, error, logging, migrations, routes};

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let pool = db::init_pool(&cfg.database_url, cfg.db_max_connections)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;

    // Embedded migrations, idempotent; a schema mismatch is fatal at boot.
    migrations::run_all(&pool)
        .await
        .map_err(|e| error::AppError::StartServer(format!("database migrations failed: {e}")))?;

    let store = Arc::new(PgChatStore::new(pool.clone()));
    let accounts = Arc::new(PgAccountDirectory::new(pool));
    let state = AppState::new(store, accounts, cfg.clone());

    let lifecycle = Lifecycle::start(&state);

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting parley-service");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;

    let app = routes::build_router(state.clone());
    // The shutdown flag must flip before serve can finish: open websockets
    // only close once their tasks observe it.
    let signal_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_state.begin_shutdown();
        })
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;

    lifecycle.shutdown(&state).await;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "failed to listen for shutdown signal"),
    }
}
