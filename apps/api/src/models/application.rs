#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Default status for freshly created applications.
pub const STATUS_ERSTELLT: &str = "erstellt";
pub const STATUS_VERSENDET: &str = "versendet";

/// One entry in an application's append-only status log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// A job application. `status_history` is append-only; its last entry always
/// matches `status` when the history is non-empty.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApplicationRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub firma: String,
    pub position: Option<String>,
    pub quelle: Option<String>,
    pub status: String,
    pub status_history: Json<Vec<StatusChange>>,
    pub notizen: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub sent_via: Option<String>,
    pub datum: DateTime<Utc>,
}
