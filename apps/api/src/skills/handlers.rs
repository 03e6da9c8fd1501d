//! Axum route handlers for the skills API.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::skill::UserSkillRow;
use crate::skills::extraction::{normalize_batch, RawExtractedSkill};
use crate::skills::merge::merge_skills;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Serialize)]
pub struct SkillListResponse {
    pub skills: Vec<UserSkillRow>,
    pub total: usize,
}

/// GET /api/v1/skills
pub async fn handle_list_skills(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<SkillListResponse>, AppError> {
    let skills: Vec<UserSkillRow> = sqlx::query_as(
        "SELECT * FROM user_skills WHERE user_id = $1 ORDER BY skill_category, skill_name",
    )
    .bind(params.user_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(SkillListResponse {
        total: skills.len(),
        skills,
    }))
}

#[derive(Deserialize)]
pub struct ExtractRequest {
    pub user_id: Uuid,
    pub document_id: Uuid,
    pub skills: Vec<RawExtractedSkill>,
}

#[derive(Serialize)]
pub struct ExtractResponse {
    pub added: usize,
    pub updated: usize,
    pub received: usize,
    pub merged: usize,
}

/// POST /api/v1/skills/extract
/// Merges one document's extraction batch. Rate-limited per user; the
/// upstream extraction call is expensive.
pub async fn handle_extract(
    State(state): State<AppState>,
    Json(req): Json<ExtractRequest>,
) -> Result<Json<ExtractResponse>, AppError> {
    state
        .limiter
        .check(&format!("skills-extract:{}", req.user_id))
        .await?;

    let normalized = normalize_batch(&req.skills);
    let outcome = merge_skills(
        &state.db,
        req.user_id,
        &normalized,
        req.document_id,
        state.clock.now(),
    )
    .await?;

    Ok(Json(ExtractResponse {
        added: outcome.added,
        updated: outcome.updated,
        received: req.skills.len(),
        merged: normalized.len(),
    }))
}

/// DELETE /api/v1/skills/:id
pub async fn handle_delete_skill(
    State(state): State<AppState>,
    Path(skill_id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<StatusCode, AppError> {
    let deleted = sqlx::query("DELETE FROM user_skills WHERE id = $1 AND user_id = $2")
        .bind(skill_id)
        .bind(params.user_id)
        .execute(&state.db)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(AppError::NotFound(format!("Skill {skill_id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}
