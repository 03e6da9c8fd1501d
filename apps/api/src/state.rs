use std::sync::Arc;

use sqlx::PgPool;

use crate::clock::Clock;
use crate::config::Config;
use crate::ratelimit::RateLimiter;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    /// Injected time source; window arithmetic and signature tolerance stay
    /// testable against a manual clock.
    pub clock: Arc<dyn Clock>,
    /// Shared-store limiter guarding the extraction endpoint.
    pub limiter: Arc<RateLimiter>,
}
