use anyhow::{anyhow, Result};
use diesel::Connection;
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::sync::Arc;
use tokio::time::Duration;

use crate::config::DatabaseConfig;

pub type DbPool = Pool<AsyncPgConnection>;
pub type DbConnection = Object<AsyncPgConnection>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the pool and block until one connection succeeds.
pub async fn create_pool(config: &DatabaseConfig) -> Result<Arc<DbPool>> {
    tracing::info!(
        "Connecting to {} (max {} connections)",
        mask_database_url(&config.url),
        config.max_connections
    );

    let pool = Pool::builder(AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.url))
        .max_size(config.max_connections as usize)
        .build()
        .map_err(|e| anyhow!("Failed to build database pool: {}", e))?;

    wait_for_connection(&pool).await?;
    Ok(Arc::new(pool))
}

/// Up to `CONNECT_ATTEMPTS` checkouts with exponential backoff (1s, 2s, 4s, ...).
async fn wait_for_connection(pool: &DbPool) -> Result<()> {
    let mut backoff = Duration::from_secs(1);

    for attempt in 1..=CONNECT_ATTEMPTS {
        let failure = match tokio::time::timeout(CONNECT_TIMEOUT, pool.get()).await {
            Ok(Ok(_)) => {
                tracing::info!("Database reachable after {} attempt(s)", attempt);
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no connection within {:?}", CONNECT_TIMEOUT),
        };

        if attempt == CONNECT_ATTEMPTS {
            tracing::error!("Giving up on the database after {} attempts: {}", attempt, failure);
            return Err(anyhow!("database unreachable: {}", failure));
        }

        tracing::warn!(
            "Database attempt {}/{} failed: {}. Retrying in {:?}",
            attempt,
            CONNECT_ATTEMPTS,
            failure,
            backoff
        );
        tokio::time::sleep(backoff).await;
        backoff *= 2;
    }

    Err(anyhow!("database unreachable"))
}

/// Apply embedded migrations. The harness is synchronous, so it runs on the
/// blocking pool through the async connection wrapper.
pub async fn run_migrations(config: &DatabaseConfig) -> Result<()> {
    let url = config.url.clone();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = AsyncConnectionWrapper::<AsyncPgConnection>::establish(&url)
            .map_err(|e| anyhow!("Failed to connect for migrations: {}", e))?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow!("Failed to run migrations: {}", e))?;

        if applied.is_empty() {
            tracing::info!("Database schema is up to date");
        } else {
            for version in &applied {
                tracing::info!("Applied migration {}", version);
            }
        }
        Ok(())
    })
    .await
    .map_err(|e| anyhow!("Migration task panicked: {}", e))?
}

/// Replace the password of a connection URL with `****` for logging.
pub fn mask_database_url(url: &str) -> String {
    let Some(at) = url.rfind('@') else {
        return "Invalid URL format".to_string();
    };
    let (credentials, host) = url.split_at(at);
    // The scheme's "://" is not a password separator
    match credentials.rfind(':') {
        Some(colon) if !credentials[colon..].starts_with("://") => {
            format!("{}:****{}", &credentials[..colon], host)
        }
        _ => url.to_string(),
    }
}
