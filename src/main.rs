use std::sync::Arc;

use ratchet_core::api::ApiServer;
use ratchet_core::bus::MessageBus;
use ratchet_core::config::Config;
use ratchet_core::secrets::EnvSecretsProvider;
use ratchet_core::store::{SqliteTaskStore, TaskStore};
use ratchet_core::Result;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("starting ratchet");

    let config = Config::load()?;
    let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::open(&config.store.sqlite_path)?);
    let bus = Arc::new(MessageBus::new());
    let _secrets = Arc::new(EnvSecretsProvider);

    // Team and agent rosters are deployment-specific (which provider
    // aliases, how many agents, who leads); wiring them up here would bake
    // in a fixed topology. This binary starts the store, bus, and the thin
    // API so the core is reachable; embedders construct `Team`/`Agent`
    // instances against `store.clone()`/`bus.clone()` directly.
    let api_server = ApiServer::new(config.api.clone(), store, bus);

    if let Err(e) = api_server.run().await {
        error!(error = %e, "api server exited");
        return Err(e);
    }

    Ok(())
}
