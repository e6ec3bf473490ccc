use std::sync::Arc;

use raffle_chain::TransactionVerifier;
use raffle_guard::{Guards, RateLimits};
use raffle_ledger::WinnerSelector;
use raffle_store::{InMemoryRaffleStore, PgRaffleStore, RaffleStore};

use crate::auth::{AdminAuth, StaticTokenAuth};
use crate::config::{AppConfig, StoreConfig};
use crate::error::ServerResult;
use crate::pipeline::ConfirmationPipeline;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn RaffleStore>,
    pub limits: RateLimits,
    pub pipeline: Arc<ConfirmationPipeline>,
    pub selector: Arc<WinnerSelector>,
    pub auth: Arc<dyn AdminAuth>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn RaffleStore>,
        verifier: TransactionVerifier,
        guards: Guards,
    ) -> Self {
        let pipeline = ConfirmationPipeline::new(store.clone(), verifier, guards.lock);
        let selector = WinnerSelector::new(store.clone(), config.draw.clone());
        let auth = StaticTokenAuth::new(config.server.admin_token.clone());
        Self {
            config: Arc::new(config),
            store,
            limits: guards.limits,
            pipeline: Arc::new(pipeline),
            selector: Arc::new(selector),
            auth: Arc::new(auth),
        }
    }

    /// Build everything `config` describes, connecting the store and shared
    /// guard backends if configured.
    pub async fn from_config(config: AppConfig) -> ServerResult<Self> {
        let store = open_store(&config.store).await?;
        let guards = Guards::from_config(&config.limits).await?;
        let verifier = TransactionVerifier::from_config(config.verifier.clone());
        Ok(Self::new(config, store, verifier, guards))
    }

    pub fn with_auth(mut self, auth: Arc<dyn AdminAuth>) -> Self {
        self.auth = auth;
        self
    }
}

async fn open_store(config: &StoreConfig) -> ServerResult<Arc<dyn RaffleStore>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(InMemoryRaffleStore::new())),
        StoreConfig::Postgres { url, max_connections } => {
            Ok(Arc::new(PgRaffleStore::connect(url, *max_connections).await?))
        }
    }
}
