use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;
use vigil_core::VigilContext;

use crate::jobs::{cleanup, dispatch_sos, recover_stale_sos, sweep_missed_check_ins, sweep_reminders};

/// Next instant on the UTC grid of `interval_hours`, strictly after `now`.
/// Intervals that divide 24 land on fixed wall-clock hours (00:00/12:00 for 12).
pub fn next_aligned(now: DateTime<Utc>, interval_hours: u32) -> DateTime<Utc> {
    let interval_secs = i64::from(interval_hours.max(1)) * 3_600;
    let next = (now.timestamp().div_euclid(interval_secs) + 1) * interval_secs;
    DateTime::from_timestamp(next, 0).unwrap_or_else(|| now + ChronoDuration::seconds(interval_secs))
}

/// Run a whole job up to `max_attempts` times with a fixed delay in between.
pub async fn run_with_retry<T, E, F, Fut>(
    name: &str,
    max_attempts: u32,
    delay: Duration,
    mut job: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match job().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                tracing::warn!(
                    "Job {} failed (attempt {}/{}): {}. Retrying in {:?}",
                    name,
                    attempt,
                    max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!("Job {} failed after {} attempts: {}", name, max_attempts, e);
                return Err(anyhow!("job {} failed after {} attempts: {}", name, max_attempts, e));
            }
        }
    }
}

fn retry_delay(ctx: &VigilContext) -> Duration {
    Duration::from_secs(ctx.config.scheduler.job_retry_delay_secs)
}

/// Sleep until each grid point, then run the job with retries. Never returns.
async fn every<T, F, Fut>(ctx: VigilContext, name: &'static str, interval_hours: u32, job: F)
where
    T: Debug,
    F: Fn(VigilContext, DateTime<Utc>) -> Fut,
    Fut: Future<Output = vigil_core::Result<T>>,
{
    tracing::info!("Scheduled job {} every {}h", name, interval_hours);
    loop {
        let now = Utc::now();
        let next = next_aligned(now, interval_hours);
        tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;

        let run_at = Utc::now();
        match run_with_retry(
            name,
            ctx.config.scheduler.job_max_attempts,
            retry_delay(&ctx),
            || job(ctx.clone(), run_at),
        )
        .await
        {
            Ok(summary) => tracing::debug!("Job {} finished: {:?}", name, summary),
            // Already logged; the next grid point re-evaluates from scratch
            Err(_) => continue,
        }
    }
}

/// Start the periodic sweeps. Recovers SOS events orphaned by a previous
/// process before the first sweep.
pub async fn run(ctx: VigilContext) -> Result<()> {
    tracing::info!("Starting scheduler");

    match recover_stale_sos(&ctx, Utc::now()).await {
        Ok(0) => {}
        Ok(n) => tracing::info!("Recovered {} pending SOS events", n),
        Err(e) => tracing::error!("Failed to recover pending SOS events: {}", e),
    }

    let scheduler = &ctx.config.scheduler;
    tokio::join!(
        every(
            ctx.clone(),
            "missed_check_ins",
            scheduler.missed_check_in_interval_hours,
            |ctx, now| async move { sweep_missed_check_ins(&ctx, now).await },
        ),
        every(
            ctx.clone(),
            "reminders",
            scheduler.reminder_interval_hours,
            |ctx, now| async move { sweep_reminders(&ctx, now).await },
        ),
        every(
            ctx.clone(),
            "cleanup",
            scheduler.cleanup_interval_hours,
            |ctx, now| async move { cleanup(&ctx, now).await },
        ),
    );

    Ok(())
}

/// Dispatch an SOS after the configured countdown, unless it was cancelled meanwhile.
pub fn schedule_sos_dispatch(ctx: VigilContext, sos_event_id: Uuid) -> JoinHandle<()> {
    tokio::spawn(async move {
        let countdown = Duration::from_secs(ctx.config.scheduler.sos_countdown_secs);
        tokio::time::sleep(countdown).await;

        match run_with_retry(
            "sos_dispatch",
            ctx.config.scheduler.job_max_attempts,
            retry_delay(&ctx),
            || dispatch_sos(&ctx, sos_event_id),
        )
        .await
        {
            Ok(summary) => tracing::info!("SOS dispatch finished: {:?}", summary),
            Err(e) => tracing::error!("SOS {} dispatch abandoned: {}", sos_event_id, e),
        }
    })
}
