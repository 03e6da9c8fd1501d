use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    /// Shared secret for verifying billing webhook signatures.
    pub stripe_webhook_secret: String,
    /// Price ids mapped to subscription plans.
    pub stripe_price_basic: String,
    pub stripe_price_pro: String,
    /// Price ids for one-time credit packs.
    pub stripe_price_credits_starter: String,
    pub stripe_price_credits_pro: String,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            stripe_webhook_secret: require_env("STRIPE_WEBHOOK_SECRET")?,
            stripe_price_basic: require_env("STRIPE_PRICE_BASIC")?,
            stripe_price_pro: require_env("STRIPE_PRICE_PRO")?,
            stripe_price_credits_starter: require_env("STRIPE_PRICE_CREDITS_STARTER")?,
            stripe_price_credits_pro: require_env("STRIPE_PRICE_CREDITS_PRO")?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}
