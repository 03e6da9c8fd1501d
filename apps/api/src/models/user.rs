#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub credits_remaining: i32,
    pub credits_max: i32,
    /// Quota-consuming actions this billing month. Only ever reset by the
    /// ledger's month-boundary check, never by direct client mutation.
    pub applications_this_month: i32,
    pub month_reset_at: Option<DateTime<Utc>>,
    pub weekly_goal: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
