use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::config::AppConfig;
use crate::error::ServerResult;
use crate::router::build_router;
use crate::state::AppState;
use crate::sweep::Sweeper;

/// Raffle confirmation server.
pub struct RaffleServer {
    config: AppConfig,
}

impl RaffleServer {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Start serving requests until interrupted.
    pub async fn serve(self) -> ServerResult<()> {
        let state = AppState::from_config(self.config.clone()).await?;

        let sweep = self
            .config
            .sweep
            .enabled
            .then(|| Sweeper::new(state.pipeline.clone(), self.config.sweep.clone()).spawn());

        let app = build_router(state);
        let listener = TcpListener::bind(&self.config.server.bind_addr).await?;
        tracing::info!("raffle server listening on {}", self.config.server.bind_addr);
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        if let Some(handle) = sweep {
            handle.abort();
        }
        tracing::info!("raffle server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
