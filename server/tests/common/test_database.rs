use anyhow::{Context, Result};
use server::config::PostgresSettings;
use server::db::postgres::connect_options;
use server::db::{PgDatabase, run_migrations};
use sqlx::{Executor, PgPool, postgres::PgPoolOptions};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::info;

// Global counter for unique database names
static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

/// A freshly migrated database, dropped again by `cleanup`.
pub struct TestDatabase {
    pub name: String,
    pub db: PgDatabase,
    /// Connection settings of the test database itself.
    pub settings: PostgresSettings,
    admin_pool: PgPool,
}

impl TestDatabase {
    /// Returns `None` when no PostgreSQL server is configured
    /// (`STATS_DB_HOST` unset), so callers can skip.
    pub async fn create(test_name: &str) -> Result<Option<Self>> {
        if std::env::var("STATS_DB_HOST").is_err() {
            eprintln!("Skipping {}: STATS_DB_HOST not set", test_name);
            return Ok(None);
        }
        let base = PostgresSettings::from_env()?;

        let counter = DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis();
        let name = format!("stats_test_{}_{}", timestamp, counter);
        info!("Creating test database: {} for test: {}", name, test_name);

        // Admin operations go through the configured database
        let admin_pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(connect_options(&base))
            .await
            .context("Failed to connect to postgres database")?;

        let create_query = format!("CREATE DATABASE \"{}\"", name);
        admin_pool
            .execute(create_query.as_str())
            .await
            .context("Failed to create test database")?;

        let settings = PostgresSettings {
            database: name.clone(),
            ..base
        };
        run_migrations(&settings).await?;
        let db = PgDatabase::connect(&settings).await?;

        Ok(Some(Self {
            name,
            db,
            settings,
            admin_pool,
        }))
    }

    pub async fn cleanup(self) -> Result<()> {
        info!("Cleaning up test database: {}", self.name);
        self.db.pool().close().await;

        let drop_query = format!("DROP DATABASE \"{}\" WITH (FORCE)", self.name);
        self.admin_pool
            .execute(drop_query.as_str())
            .await
            .context("Failed to drop test database")?;

        self.admin_pool.close().await;
        Ok(())
    }
}
