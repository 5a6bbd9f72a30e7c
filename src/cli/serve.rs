//! Serve command implementation

use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::api::{router, AppState};
use crate::config::Config;
use crate::store::SyncStore;
use crate::sync::SyncEngine;

pub async fn run(store: Arc<SyncStore>, config: &Config, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let engine = SyncEngine::new(store, config.poll.clone());

    let listener = TcpListener::bind(&bind).await?;
    info!(addr = %listener.local_addr()?, "starting chatsync API server");

    axum::serve(listener, router(AppState::new(engine)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
