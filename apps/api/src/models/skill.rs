#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Per-user skill record. At most one row per `(user_id, skill_name)`.
/// `source_document_id` is a weak back-reference to the upload that produced
/// the skill, not an ownership edge.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserSkillRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub skill_name: String,
    pub skill_category: String,
    pub experience_years: Option<f64>,
    pub source_document_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
