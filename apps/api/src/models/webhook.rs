#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const WEBHOOK_PENDING: &str = "pending";
pub const WEBHOOK_PROCESSED: &str = "processed";
pub const WEBHOOK_FAILED: &str = "failed";

/// Idempotency record for an external billing event. The unique
/// `stripe_event_id` row is the concurrency guard: a given event id is
/// applied successfully at most once.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookEventRow {
    pub id: Uuid,
    pub stripe_event_id: String,
    pub event_type: String,
    pub status: String,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
