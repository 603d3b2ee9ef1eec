use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use slicer_core::Config;
use slicer_proxy::state::AppState;
use slicer_registry::{PgRegistry, Registry};
use slicer_storage::storage_from_config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slicer=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let registry = PgRegistry::connect(
        &config.database_url,
        config.db_max_connections,
        config.db_timeout(),
        config.registry_tx_commit(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("failed to connect to registry: {}", e))?;

    registry
        .migrate()
        .await
        .map_err(|e| anyhow::anyhow!("failed to migrate registry schema: {}", e))?;

    let storage = storage_from_config(&config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to initialize storage: {}", e))?;

    let state = Arc::new(AppState::new(config, Arc::new(registry), storage));

    slicer_proxy::server::run(state).await
}
