//! Axum route handlers for billing: usage, subscription, webhooks.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::billing::signature::verify_signature;
use crate::billing::usage::{self, UsageReport};
use crate::billing::webhooks::{process_webhook, WebhookEnvelope, WebhookOutcome};
use crate::errors::AppError;
use crate::models::subscription::{SubscriptionPlan, SubscriptionRow};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Serialize)]
pub struct SubscriptionResponse {
    /// Effective plan after resolution; `free` when no row exists.
    pub plan: SubscriptionPlan,
    pub subscription: Option<SubscriptionRow>,
}

/// GET /api/v1/billing/usage
pub async fn handle_get_usage(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<UsageReport>, AppError> {
    let report = usage::get_usage(&state.db, params.user_id, state.clock.now()).await?;
    Ok(Json(report))
}

/// GET /api/v1/billing/subscription
pub async fn handle_get_subscription(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let subscription: Option<SubscriptionRow> =
        sqlx::query_as("SELECT * FROM subscriptions WHERE user_id = $1")
            .bind(params.user_id)
            .fetch_optional(&state.db)
            .await?;

    Ok(Json(SubscriptionResponse {
        plan: usage::resolve_plan(subscription.as_ref()),
        subscription,
    }))
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub user_id: Uuid,
}

/// POST /api/v1/billing/subscription/cancel
/// Marks the subscription to lapse at period end; the provider's deletion
/// webhook performs the actual downgrade.
pub async fn handle_cancel_subscription(
    State(state): State<AppState>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<Value>, AppError> {
    let updated = sqlx::query(
        "UPDATE subscriptions SET cancel_at_period_end = TRUE, canceled_at = $2 \
         WHERE user_id = $1",
    )
    .bind(req.user_id)
    .bind(state.clock.now())
    .execute(&state.db)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(AppError::NotFound(format!(
            "No subscription for user {}",
            req.user_id
        )));
    }

    Ok(Json(json!({ "success": true, "cancel_at_period_end": true })))
}

/// POST /api/v1/webhooks/stripe
/// Public endpoint; authenticity comes from the signature header, verified
/// over the raw body before any parsing.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let header = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::InvalidSignature("missing Stripe-Signature header".to_string()))?;

    let now = state.clock.now();
    verify_signature(
        &body,
        header,
        &state.config.stripe_webhook_secret,
        now.timestamp(),
    )
    .map_err(AppError::InvalidSignature)?;

    let envelope: WebhookEnvelope = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Malformed webhook payload: {e}")))?;

    let outcome = process_webhook(&state.db, &state.config, &envelope, now).await?;
    let outcome = match outcome {
        WebhookOutcome::Processed => "processed",
        WebhookOutcome::AlreadyProcessed => "already_processed",
        WebhookOutcome::InFlight => "in_flight",
        WebhookOutcome::Ignored => "ignored",
    };

    Ok(Json(json!({ "received": true, "outcome": outcome })))
}
