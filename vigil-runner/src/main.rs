use anyhow::Result;
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vigil_api::run as run_api;
use vigil_core::{Config, VigilContext};
use vigil_delivery::{EmailDelivery, FcmDelivery};
use vigil_scheduler::run as run_scheduler;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if env::var("LOG_FORMAT").map(|f| f.eq_ignore_ascii_case("json")).unwrap_or(false) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    tracing::info!("Starting Vigil");

    let config = Config::from_env();
    let email = Arc::new(EmailDelivery::new(&config.delivery)?);
    let push = Arc::new(FcmDelivery::new(&config.delivery)?);
    let ctx = VigilContext::connect(config, email, push).await?;

    tracing::info!("Vigil context initialized");

    let ctx_clone = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = run_scheduler(ctx_clone).await {
            tracing::error!("Scheduler error: {}", e);
        }
    });

    // API server runs in main task
    run_api(ctx).await?;

    Ok(())
}
