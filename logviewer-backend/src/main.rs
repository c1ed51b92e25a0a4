use backtraced_error::error_chain_to_pretty_formatted;
use clap::Parser;
use logviewer_backend::api::state::AppState;
use logviewer_backend::config::{LaunchConfig, StorageKind};
use logviewer_backend::store::memory::MemoryRowStore;
use logviewer_backend::store::postgres::PgRowStore;
use logviewer_backend::store::RowStore;
use std::sync::Arc;
use tracing::{error, info, instrument};

#[tokio::main]
async fn main() {
    // load env vars so clap can use it when parsing a config
    println!("Loading env vars");
    dotenv::dotenv().ok();
    let config = LaunchConfig::parse();
    if let Err(e) = tracing_config_helper::setup_logging(config.log_format) {
        eprintln!("Failed to set up logging: {e}");
        std::process::exit(1);
    }
    if let Err(e) = start(config).await {
        error!("{}", error_chain_to_pretty_formatted(e.as_ref()));
        std::process::exit(1);
    }
}

#[instrument(level = "error", skip_all)]
async fn start(config: LaunchConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Using config: {:#?}", config);
    let store: Arc<dyn RowStore> = match config.storage {
        StorageKind::Memory => Arc::new(MemoryRowStore::new()),
        StorageKind::Postgres => {
            let url = config
                .db
                .url
                .as_deref()
                .ok_or("DATABASE_URL is required when storage is postgres")?;
            let store = PgRowStore::connect(url, config.db.max_db_connections).await?;
            store.migrate().await?;
            Arc::new(store)
        }
    };
    logviewer_backend::api::serve(AppState::new(store), config.api_listen_port).await
}
