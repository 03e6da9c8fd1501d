//! Billing webhook processing.
//!
//! Deliveries are at-least-once and possibly out of order, so every event is
//! claimed through a `webhook_events` row first: the unique
//! `stripe_event_id` makes the insert the concurrency guard. A processed
//! event replays as an immediate success; a failed one may be retried by a
//! later delivery.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::billing::usage;
use crate::config::Config;
use crate::errors::AppError;
use crate::models::subscription::{SubscriptionPlan, SubscriptionStatus};
use crate::models::webhook::{
    WebhookEventRow, WEBHOOK_FAILED, WEBHOOK_PENDING, WEBHOOK_PROCESSED,
};

/// Credits granted per one-time credit-pack purchase.
pub const CREDITS_STARTER: i32 = 50;
pub const CREDITS_PRO: i32 = 150;

/// Parsed webhook delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: WebhookData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookData {
    #[serde(default)]
    pub object: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Effect applied and recorded.
    Processed,
    /// Event id seen before and already applied; nothing reapplied.
    AlreadyProcessed,
    /// Another delivery of this event is mid-application.
    InFlight,
    /// Event type we don't handle; acknowledged so it is not redelivered.
    Ignored,
}

enum Claim {
    Fresh,
    AlreadyProcessed,
    InFlight,
}

/// Applies a verified webhook event at most once.
pub async fn process_webhook(
    pool: &PgPool,
    config: &Config,
    envelope: &WebhookEnvelope,
    now: DateTime<Utc>,
) -> Result<WebhookOutcome, AppError> {
    if envelope.id.is_empty() {
        return Err(AppError::Validation("webhook event id is empty".to_string()));
    }

    match claim_event(pool, &envelope.id, &envelope.event_type).await? {
        Claim::AlreadyProcessed => {
            tracing::info!(event_id = %envelope.id, "webhook replay, already processed");
            return Ok(WebhookOutcome::AlreadyProcessed);
        }
        Claim::InFlight => {
            tracing::info!(event_id = %envelope.id, "webhook delivery overlaps in-flight processing");
            return Ok(WebhookOutcome::InFlight);
        }
        Claim::Fresh => {}
    }

    match apply_event(pool, config, envelope, now).await {
        Ok(applied) => {
            mark_processed(pool, &envelope.id, now).await?;
            if applied {
                tracing::info!(event_id = %envelope.id, event_type = %envelope.event_type, "webhook processed");
                Ok(WebhookOutcome::Processed)
            } else {
                tracing::info!(event_type = %envelope.event_type, "unhandled webhook event type");
                Ok(WebhookOutcome::Ignored)
            }
        }
        Err(e) => {
            // Leave the row failed so a future delivery of this id retries.
            mark_failed(pool, &envelope.id, &e.to_string()).await?;
            Err(e)
        }
    }
}

async fn claim_event(pool: &PgPool, event_id: &str, event_type: &str) -> Result<Claim, AppError> {
    let inserted = sqlx::query(
        "INSERT INTO webhook_events (stripe_event_id, event_type, status) \
         VALUES ($1, $2, $3) ON CONFLICT (stripe_event_id) DO NOTHING",
    )
    .bind(event_id)
    .bind(event_type)
    .bind(WEBHOOK_PENDING)
    .execute(pool)
    .await?
    .rows_affected();

    if inserted == 1 {
        return Ok(Claim::Fresh);
    }

    let existing: WebhookEventRow =
        sqlx::query_as("SELECT * FROM webhook_events WHERE stripe_event_id = $1")
            .bind(event_id)
            .fetch_one(pool)
            .await?;

    match existing.status.as_str() {
        WEBHOOK_PROCESSED => Ok(Claim::AlreadyProcessed),
        WEBHOOK_FAILED => {
            // Reclaim for retry; the status guard loses gracefully to a
            // concurrent reclaim of the same row.
            let reclaimed = sqlx::query(
                "UPDATE webhook_events SET status = $2, error_message = NULL \
                 WHERE stripe_event_id = $1 AND status = $3",
            )
            .bind(event_id)
            .bind(WEBHOOK_PENDING)
            .bind(WEBHOOK_FAILED)
            .execute(pool)
            .await?
            .rows_affected();

            if reclaimed == 1 {
                Ok(Claim::Fresh)
            } else {
                Ok(Claim::InFlight)
            }
        }
        _ => Ok(Claim::InFlight),
    }
}

async fn mark_processed(pool: &PgPool, event_id: &str, now: DateTime<Utc>) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE webhook_events SET status = $2, processed_at = $3, error_message = NULL \
         WHERE stripe_event_id = $1",
    )
    .bind(event_id)
    .bind(WEBHOOK_PROCESSED)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

async fn mark_failed(pool: &PgPool, event_id: &str, message: &str) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE webhook_events SET status = $2, error_message = $3 WHERE stripe_event_id = $1",
    )
    .bind(event_id)
    .bind(WEBHOOK_FAILED)
    .bind(message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Dispatches an event to its effect. Returns false for unhandled types.
async fn apply_event(
    pool: &PgPool,
    config: &Config,
    envelope: &WebhookEnvelope,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let object = &envelope.data.object;
    match envelope.event_type.as_str() {
        "checkout.session.completed" => {
            handle_checkout_completed(pool, config, object).await?;
            Ok(true)
        }
        "customer.subscription.created" | "customer.subscription.updated" => {
            handle_subscription_upsert(pool, config, object).await?;
            Ok(true)
        }
        "customer.subscription.deleted" => {
            handle_subscription_deleted(pool, object, now).await?;
            Ok(true)
        }
        "invoice.payment_succeeded" => {
            handle_invoice_paid(pool, object).await?;
            Ok(true)
        }
        "invoice.payment_failed" => {
            handle_invoice_failed(pool, object).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Event effects
// ────────────────────────────────────────────────────────────────────────────

/// Checkout completed: a subscription checkout creates or updates the user's
/// subscription; a one-time payment grants a credit pack.
async fn handle_checkout_completed(
    pool: &PgPool,
    config: &Config,
    object: &Value,
) -> Result<(), AppError> {
    let Some(customer_id) = object.get("customer").and_then(Value::as_str) else {
        tracing::warn!("checkout session missing customer id");
        return Ok(());
    };

    let Some(user_id) = find_user_by_customer(pool, customer_id).await? else {
        tracing::warn!(customer_id, "no user for billing customer");
        return Ok(());
    };

    let mode = object.get("mode").and_then(Value::as_str).unwrap_or("subscription");
    if mode == "payment" {
        let price_id = extract_price_id(object);
        match credits_for_price(config, price_id.as_deref()) {
            Some(amount) => usage::add_credits(pool, user_id, amount).await?,
            None => tracing::warn!(?price_id, "one-time checkout with unknown price id"),
        }
        return Ok(());
    }

    upsert_subscription(pool, config, user_id, customer_id, object).await
}

/// Subscription created/updated: upsert the user's single subscription row
/// from the payload.
async fn handle_subscription_upsert(
    pool: &PgPool,
    config: &Config,
    object: &Value,
) -> Result<(), AppError> {
    let Some(customer_id) = object.get("customer").and_then(Value::as_str) else {
        tracing::warn!("subscription event missing customer id");
        return Ok(());
    };

    let Some(user_id) = find_user_by_customer(pool, customer_id).await? else {
        tracing::warn!(customer_id, "no user for billing customer");
        return Ok(());
    };

    upsert_subscription(pool, config, user_id, customer_id, object).await
}

/// Subscription deleted: mark canceled and reset the plan to free, keeping
/// the row (and its history) around.
async fn handle_subscription_deleted(
    pool: &PgPool,
    object: &Value,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let Some(subscription_id) = object.get("id").and_then(Value::as_str) else {
        tracing::warn!("subscription deletion missing subscription id");
        return Ok(());
    };

    let updated = sqlx::query(
        "UPDATE subscriptions SET status = $2, plan = $3, stripe_subscription_id = NULL, \
         cancel_at_period_end = FALSE, canceled_at = $4 \
         WHERE stripe_subscription_id = $1",
    )
    .bind(subscription_id)
    .bind(SubscriptionStatus::Canceled)
    .bind(SubscriptionPlan::Free)
    .bind(now)
    .execute(pool)
    .await?
    .rows_affected();

    if updated == 0 {
        tracing::warn!(subscription_id, "deletion for unknown subscription");
    } else {
        tracing::info!(subscription_id, "subscription canceled, user back on free plan");
    }
    Ok(())
}

/// Invoice paid: confirm active status and refresh the billing period from
/// the first invoice line.
async fn handle_invoice_paid(pool: &PgPool, object: &Value) -> Result<(), AppError> {
    let Some(subscription_id) = object.get("subscription").and_then(Value::as_str) else {
        tracing::warn!("invoice missing subscription id");
        return Ok(());
    };

    let (period_start, period_end) = extract_invoice_period(object);
    sqlx::query(
        "UPDATE subscriptions SET status = $2, \
         current_period_start = COALESCE($3, current_period_start), \
         current_period_end = COALESCE($4, current_period_end) \
         WHERE stripe_subscription_id = $1",
    )
    .bind(subscription_id)
    .bind(SubscriptionStatus::Active)
    .bind(period_start)
    .bind(period_end)
    .execute(pool)
    .await?;
    Ok(())
}

/// Invoice failed: park the subscription in past_due until payment recovers.
async fn handle_invoice_failed(pool: &PgPool, object: &Value) -> Result<(), AppError> {
    let Some(subscription_id) = object.get("subscription").and_then(Value::as_str) else {
        tracing::warn!("invoice missing subscription id");
        return Ok(());
    };

    sqlx::query("UPDATE subscriptions SET status = $2 WHERE stripe_subscription_id = $1")
        .bind(subscription_id)
        .bind(SubscriptionStatus::PastDue)
        .execute(pool)
        .await?;
    Ok(())
}

async fn find_user_by_customer(pool: &PgPool, customer_id: &str) -> Result<Option<Uuid>, AppError> {
    Ok(
        sqlx::query_scalar("SELECT id FROM users WHERE stripe_customer_id = $1")
            .bind(customer_id)
            .fetch_optional(pool)
            .await?,
    )
}

async fn upsert_subscription(
    pool: &PgPool,
    config: &Config,
    user_id: Uuid,
    customer_id: &str,
    object: &Value,
) -> Result<(), AppError> {
    let subscription_id = object
        .get("subscription")
        .and_then(Value::as_str)
        .or_else(|| object.get("id").and_then(Value::as_str));
    let price_id = extract_price_id(object);
    // A checkout payload without a resolvable price still means a paid plan.
    let plan = match price_id.as_deref() {
        Some(price_id) => plan_from_price_id(config, price_id),
        None => SubscriptionPlan::Basic,
    };
    let status = map_stripe_status(object.get("status").and_then(Value::as_str).unwrap_or("active"));

    sqlx::query(
        "INSERT INTO subscriptions \
           (user_id, stripe_customer_id, stripe_subscription_id, plan, status, \
            current_period_start, current_period_end, cancel_at_period_end, canceled_at, trial_end) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         ON CONFLICT (user_id) DO UPDATE SET \
           stripe_customer_id = EXCLUDED.stripe_customer_id, \
           stripe_subscription_id = EXCLUDED.stripe_subscription_id, \
           plan = EXCLUDED.plan, \
           status = EXCLUDED.status, \
           current_period_start = EXCLUDED.current_period_start, \
           current_period_end = EXCLUDED.current_period_end, \
           cancel_at_period_end = EXCLUDED.cancel_at_period_end, \
           canceled_at = EXCLUDED.canceled_at, \
           trial_end = EXCLUDED.trial_end",
    )
    .bind(user_id)
    .bind(customer_id)
    .bind(subscription_id)
    .bind(plan)
    .bind(status)
    .bind(epoch_field(object, "current_period_start"))
    .bind(epoch_field(object, "current_period_end"))
    .bind(object.get("cancel_at_period_end").and_then(Value::as_bool).unwrap_or(false))
    .bind(epoch_field(object, "canceled_at"))
    .bind(epoch_field(object, "trial_end"))
    .execute(pool)
    .await?;

    tracing::info!(%user_id, plan = plan.as_str(), "subscription upserted");
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Payload field extraction
// ────────────────────────────────────────────────────────────────────────────

/// Provider status string to our subscription status.
pub fn map_stripe_status(stripe_status: &str) -> SubscriptionStatus {
    match stripe_status {
        "active" => SubscriptionStatus::Active,
        "trialing" => SubscriptionStatus::Trialing,
        "canceled" | "incomplete_expired" => SubscriptionStatus::Canceled,
        "past_due" | "incomplete" | "unpaid" => SubscriptionStatus::PastDue,
        _ => SubscriptionStatus::Active,
    }
}

pub fn plan_from_price_id(config: &Config, price_id: &str) -> SubscriptionPlan {
    if price_id == config.stripe_price_basic {
        SubscriptionPlan::Basic
    } else if price_id == config.stripe_price_pro {
        SubscriptionPlan::Pro
    } else {
        SubscriptionPlan::Free
    }
}

pub fn credits_for_price(config: &Config, price_id: Option<&str>) -> Option<i32> {
    let price_id = price_id?;
    if price_id == config.stripe_price_credits_starter {
        Some(CREDITS_STARTER)
    } else if price_id == config.stripe_price_credits_pro {
        Some(CREDITS_PRO)
    } else {
        None
    }
}

/// First price id in the payload: subscription items, then invoice lines,
/// then checkout-session metadata.
pub fn extract_price_id(object: &Value) -> Option<String> {
    for list_field in ["items", "lines"] {
        let price = object
            .get(list_field)
            .and_then(|items| items.get("data"))
            .and_then(Value::as_array)
            .and_then(|data| data.first())
            .and_then(|item| item.get("price"))
            .and_then(|price| price.get("id"))
            .and_then(Value::as_str);
        if let Some(price) = price {
            return Some(price.to_string());
        }
    }
    object
        .get("metadata")
        .and_then(|m| m.get("price_id"))
        .and_then(Value::as_str)
        .map(String::from)
}

/// Billing period bounds from the first invoice line.
pub fn extract_invoice_period(object: &Value) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let period = object
        .get("lines")
        .and_then(|lines| lines.get("data"))
        .and_then(Value::as_array)
        .and_then(|data| data.first())
        .and_then(|line| line.get("period"));

    match period {
        Some(period) => (epoch_field(period, "start"), epoch_field(period, "end")),
        None => (None, None),
    }
}

fn epoch_field(object: &Value, field: &str) -> Option<DateTime<Utc>> {
    object
        .get(field)
        .and_then(Value::as_i64)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

// ────────────────────────────────────────────────────────────────────────────
// Scheduled maintenance
// ────────────────────────────────────────────────────────────────────────────

/// Retention window for processed webhook rows.
pub const PROCESSED_RETENTION_DAYS: i64 = 90;

/// Events stuck pending longer than this are flipped to failed so a
/// redelivery can retry (crash recovery).
pub const PENDING_REAP_MINUTES: i64 = 15;

/// Deletes processed events older than the retention window.
pub async fn purge_processed_events(pool: &PgPool, now: DateTime<Utc>) -> anyhow::Result<u64> {
    let cutoff = now - chrono::Duration::days(PROCESSED_RETENTION_DAYS);
    let deleted = sqlx::query(
        "DELETE FROM webhook_events WHERE status = $1 AND processed_at IS NOT NULL AND processed_at < $2",
    )
    .bind(WEBHOOK_PROCESSED)
    .bind(cutoff)
    .execute(pool)
    .await?
    .rows_affected();
    if deleted > 0 {
        tracing::info!(deleted, "purged old processed webhook events");
    }
    Ok(deleted)
}

/// Flips long-pending events to failed so they stop blocking retries.
pub async fn reap_stale_pending(pool: &PgPool, now: DateTime<Utc>) -> anyhow::Result<u64> {
    let cutoff = now - chrono::Duration::minutes(PENDING_REAP_MINUTES);
    let reaped = sqlx::query(
        "UPDATE webhook_events SET status = $1, error_message = 'processing timed out' \
         WHERE status = $2 AND created_at < $3",
    )
    .bind(WEBHOOK_FAILED)
    .bind(WEBHOOK_PENDING)
    .bind(cutoff)
    .execute(pool)
    .await?
    .rows_affected();
    if reaped > 0 {
        tracing::warn!(reaped, "reaped webhook events stuck in pending");
    }
    Ok(reaped)
}
