use std::env;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use ragdesk_backend::core::config::AppPaths;
use ragdesk_backend::core::logging;
use ragdesk_backend::server;
use ragdesk_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = Arc::new(AppPaths::new());
    logging::init(&paths, "server.log");

    let state = AppState::initialize(paths).await?;

    if state.index.index_exists() {
        if let Err(err) = state.index.get().await {
            tracing::warn!("Failed to pre-load vector index: {}", err);
        }
    } else {
        tracing::warn!(
            "No vector index at {}; POST /api/ingest or run ragdesk-ingest first",
            state.ingestor.index_path().display()
        );
    }

    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse::<u16>().ok())
        .unwrap_or(state.settings.server.port);
    let bind_addr = format!("{}:{}", state.settings.server.host, port);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;
    tracing::info!("Listening on {}", addr);

    let app: Router = server::router::router(state.clone());
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
