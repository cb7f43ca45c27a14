use std::sync::Arc;

use anyhow::Result;
use server::api::{AppState, run_api_server};
use server::config::{Config, StorageBackend};
use server::db::{Database, MemoryDatabase, PgDatabase, run_migrations};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if exists
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration: {:?}", config);

    let db: Arc<dyn Database> = match &config.storage {
        StorageBackend::Postgres(settings) => {
            run_migrations(settings).await?;
            Arc::new(PgDatabase::connect(settings).await?)
        }
        StorageBackend::Memory => {
            warn!("STATS_STORAGE=memory: data lives in this process and is lost on restart");
            Arc::new(MemoryDatabase::new())
        }
    };

    let state = AppState::new(db, &config);
    let addr = format!("0.0.0.0:{}", config.http_port);
    run_api_server(&addr, state).await?;

    info!("Server shut down successfully");
    Ok(())
}
