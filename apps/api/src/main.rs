mod applications;
mod billing;
mod clock;
mod config;
mod db;
mod errors;
mod models;
mod ratelimit;
mod routes;
mod scheduler;
mod skills;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::billing::webhooks::{purge_processed_events, reap_stale_pending};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::{create_pool, run_migrations};
use crate::ratelimit::{RateLimiter, RedisStore};
use crate::routes::build_router;
use crate::scheduler::Scheduler;
use crate::state::AppState;

/// Extraction endpoint budget per user: the upstream AI call is expensive.
const EXTRACT_RATE_LIMIT: u64 = 10;
const EXTRACT_RATE_WINDOW_SECS: u64 = 3600;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Bewerbungs API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL and apply migrations
    let db = create_pool(&config.database_url).await?;
    run_migrations(&db).await?;

    // Initialize Redis (shared rate-limit store)
    let redis = redis::Client::open(config.redis_url.clone())?;
    info!("Redis client initialized");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let limiter = Arc::new(RateLimiter::new(
        Arc::new(RedisStore::new(redis)),
        clock.clone(),
        EXTRACT_RATE_LIMIT,
        EXTRACT_RATE_WINDOW_SECS,
    ));

    // Build app state
    let state = AppState {
        db: db.clone(),
        config: config.clone(),
        clock: clock.clone(),
        limiter,
    };

    // Background maintenance: webhook retention + stuck-pending recovery.
    // Each run opens its own short transactions and never blocks requests.
    let mut scheduler = Scheduler::new();
    {
        let pool = db.clone();
        let task_clock = clock.clone();
        scheduler.spawn(
            "webhook-retention",
            Duration::from_secs(24 * 60 * 60),
            move || {
                let pool = pool.clone();
                let now = task_clock.now();
                async move {
                    purge_processed_events(&pool, now).await?;
                    Ok(())
                }
            },
        );
    }
    {
        let pool = db.clone();
        let task_clock = clock.clone();
        scheduler.spawn("webhook-reaper", Duration::from_secs(5 * 60), move || {
            let pool = pool.clone();
            let now = task_clock.now();
            async move {
                reap_stale_pending(&pool, now).await?;
                Ok(())
            }
        });
    }

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
}
