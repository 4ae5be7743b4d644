mod auth;
mod logger;
mod models;
mod proxy;
mod store;

use std::sync::Arc;

use tracing::{error, info, warn};

use proxy::config::AppConfig;
use proxy::pool::AccountPool;
use store::{AccountStore, JsonFileStore};

#[tokio::main]
async fn main() {
    logger::init_logger();

    let config = AppConfig::from_env();
    info!("starting kiro-relay on {}:{}", config.host, config.port);

    let store = match JsonFileStore::load_or_create(config.accounts_file.clone()) {
        Ok(store) => store,
        Err(e) => {
            error!("failed to open account store: {}", e);
            std::process::exit(1);
        }
    };

    // Standalone daemon mode: with no imported accounts, seed the pool from
    // the Kiro credential file on disk.
    match store.bootstrap_standalone(&config.token_file, config.client_file.as_deref()) {
        Ok(true) => info!("seeded account pool from {}", config.token_file.display()),
        Ok(false) => {}
        Err(e) => warn!("standalone bootstrap failed: {}", e),
    }

    let store: Arc<dyn AccountStore> = Arc::new(store);
    if store.list().is_empty() {
        warn!("no accounts configured; import one via POST /admin/account");
    }

    let pool = Arc::new(AccountPool::new(store.clone(), &config));

    if let Err(e) = proxy::server::serve(&config, pool, store).await {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("kiro-relay stopped");
}
