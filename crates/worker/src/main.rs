//! Ajar Background Worker
//!
//! Handles scheduled jobs including:
//! - Subscription window expiry sweep (every 15 minutes)
//! - Stuck webhook event recovery (every 10 minutes)
//! - Nightly ledger invariant check (daily at 3:00 AM UTC)
//! - Health check heartbeat (every 5 minutes)

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use ajar_billing::{webhooks, InvariantChecker, SubscriptionService, ViolationSeverity};

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Ajar Worker");

    // Create database pool
    let pool = create_db_pool().await?;

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Expire lapsed subscription windows (every 15 minutes)
    // Natural expiry: active windows whose end date has passed flip to expired
    let expiry_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 */15 * * * *", move |_uuid, _l| {
            let subscriptions = SubscriptionService::new(expiry_pool.clone());
            Box::pin(async move {
                match subscriptions.expire_due_windows().await {
                    Ok(0) => {}
                    Ok(expired) => {
                        info!(expired = expired, "Subscription expiry sweep complete")
                    }
                    Err(e) => error!(error = %e, "Subscription expiry sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Subscription expiry sweep (every 15 minutes)");

    // Job 2: Recover webhook events stuck in 'processing' (every 10 minutes)
    // A worker that died mid-event leaves its claim row blocking redelivery
    let recovery_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 */10 * * * *", move |_uuid, _l| {
            let pool = recovery_pool.clone();
            Box::pin(async move {
                match webhooks::recover_stuck_events(&pool).await {
                    Ok(0) => {}
                    Ok(recovered) => {
                        warn!(recovered = recovered, "Recovered stuck webhook events")
                    }
                    Err(e) => error!(error = %e, "Stuck webhook recovery failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Stuck webhook event recovery (every 10 minutes)");

    // Job 3: Nightly ledger invariant check (daily at 3:00 AM UTC)
    let invariant_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let checker = InvariantChecker::new(invariant_pool.clone());
            Box::pin(async move {
                info!("Running nightly ledger invariant check");
                match checker.run_all_checks().await {
                    Ok(summary) => {
                        info!(
                            checks_run = summary.checks_run,
                            checks_passed = summary.checks_passed,
                            healthy = summary.healthy,
                            "Invariant check complete"
                        );
                        for violation in &summary.violations {
                            match violation.severity {
                                ViolationSeverity::Critical | ViolationSeverity::High => {
                                    error!(
                                        invariant = %violation.invariant,
                                        severity = %violation.severity,
                                        affected_users = violation.user_ids.len(),
                                        description = %violation.description,
                                        "Ledger invariant violated"
                                    );
                                }
                                _ => {
                                    warn!(
                                        invariant = %violation.invariant,
                                        severity = %violation.severity,
                                        description = %violation.description,
                                        "Ledger invariant violated"
                                    );
                                }
                            }
                        }
                    }
                    Err(e) => error!(error = %e, "Invariant check failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Nightly ledger invariant check (3:00 AM UTC)");

    // Job 4: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Start the scheduler
    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Ajar Worker started successfully with {} scheduled jobs", 4);

    // Keep the main task running
    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
