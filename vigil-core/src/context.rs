use std::sync::Arc;

use crate::config::Config;
use crate::db::{create_pool, run_migrations};
use crate::delivery::{EmailSender, PushSender};
use crate::encryption::resolve_content_key;
use crate::store::{PgStore, Store};

/// Shared handles passed to every service, sweep and handler.
#[derive(Clone)]
pub struct VigilContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub email: Arc<dyn EmailSender>,
    pub push: Arc<dyn PushSender>,
    pub content_key: Arc<String>,
}

impl VigilContext {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        email: Arc<dyn EmailSender>,
        push: Arc<dyn PushSender>,
    ) -> Self {
        let content_key = Arc::new(resolve_content_key(&config.security));
        VigilContext {
            config: Arc::new(config),
            store,
            email,
            push,
            content_key,
        }
    }

    /// Connect to Postgres, apply migrations if enabled, and build the context.
    pub async fn connect(
        config: Config,
        email: Arc<dyn EmailSender>,
        push: Arc<dyn PushSender>,
    ) -> anyhow::Result<Self> {
        if config.database.run_migrations {
            run_migrations(&config.database).await?;
        }
        let pool = create_pool(&config.database).await?;
        let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

        Ok(Self::new(config, store, email, push))
    }
}
