use quill_api::{app, AppState};
use quill_core::config::Settings;
use quill_db::{DeliveryStore, MemoryDeliveryStore, PgDeliveryStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let settings = Settings::from_env()?;

    let default_max_attempts = settings.dispatch.default_max_attempts;
    let store: Arc<dyn DeliveryStore> = match settings.database_url.as_deref() {
        Some(database_url) => {
            let store = PgDeliveryStore::connect(database_url, 10)
                .await?
                .with_default_max_attempts(default_max_attempts);
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            warn!("no database configured; deliveries are kept in memory and lost on restart");
            Arc::new(MemoryDeliveryStore::with_default_max_attempts(
                default_max_attempts,
            ))
        }
    };

    let addr: SocketAddr = settings.api_bind.parse()?;
    let backend = store.backend_name();
    let state = AppState::new(store, settings)?;

    info!(%addr, backend, "starting api");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
