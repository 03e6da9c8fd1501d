//! Axum route handlers for the applications API.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::applications::status::{
    create_application, fetch_owned, mark_sent, parse_days_filter, set_status, timeline,
};
use crate::billing::usage;
use crate::errors::AppError;
use crate::models::application::ApplicationRow;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub user_id: Uuid,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    20
}

#[derive(Serialize)]
pub struct ListResponse {
    pub applications: Vec<ApplicationRow>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub pages: i64,
}

/// GET /api/v1/applications
pub async fn handle_list(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<ListResponse>, AppError> {
    let page = params.page.max(1);
    let per_page = params.per_page.clamp(1, 100);

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM applications WHERE user_id = $1")
        .bind(params.user_id)
        .fetch_one(&state.db)
        .await?;

    let applications = sqlx::query_as::<_, ApplicationRow>(
        "SELECT * FROM applications WHERE user_id = $1 ORDER BY datum DESC LIMIT $2 OFFSET $3",
    )
    .bind(params.user_id)
    .bind(per_page)
    .bind((page - 1) * per_page)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(ListResponse {
        applications,
        total,
        page,
        per_page,
        pages: (total + per_page - 1) / per_page,
    }))
}

#[derive(Deserialize)]
pub struct CreateRequest {
    pub user_id: Uuid,
    pub firma: String,
    pub position: Option<String>,
    pub quelle: Option<String>,
    pub notizen: Option<String>,
}

/// POST /api/v1/applications
/// Quota-consuming: the ledger is debited first and refunded if the insert
/// fails afterwards.
pub async fn handle_create(
    State(state): State<AppState>,
    Json(req): Json<CreateRequest>,
) -> Result<(StatusCode, Json<ApplicationRow>), AppError> {
    let firma = req.firma.trim();
    if firma.is_empty() {
        return Err(AppError::Validation("firma is required".to_string()));
    }

    let now = state.clock.now();
    let consumption = usage::consume(&state.db, req.user_id, now).await?;

    let created = create_application(
        &state.db,
        req.user_id,
        firma,
        req.position.as_deref(),
        req.quelle.as_deref(),
        req.notizen.as_deref(),
        now,
    )
    .await;

    match created {
        Ok(app) => Ok((StatusCode::CREATED, Json(app))),
        Err(e) => {
            if let Err(refund_err) = usage::refund(&state.db, req.user_id, consumption).await {
                tracing::error!("Failed to refund usage after create error: {refund_err}");
            }
            Err(e)
        }
    }
}

/// GET /api/v1/applications/:id
pub async fn handle_get(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<ApplicationRow>, AppError> {
    Ok(Json(fetch_owned(&state.db, app_id, params.user_id).await?))
}

#[derive(Deserialize)]
pub struct UpdateRequest {
    pub user_id: Uuid,
    pub status: Option<String>,
    pub notizen: Option<String>,
}

/// PUT /api/v1/applications/:id
/// Updates status (through the transition rule) and/or notes.
pub async fn handle_update(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<ApplicationRow>, AppError> {
    let mut app = fetch_owned(&state.db, app_id, req.user_id).await?;

    if let Some(notizen) = &req.notizen {
        sqlx::query("UPDATE applications SET notizen = $3 WHERE id = $1 AND user_id = $2")
            .bind(app_id)
            .bind(req.user_id)
            .bind(notizen)
            .execute(&state.db)
            .await?;
        app.notizen = Some(notizen.clone());
    }

    if let Some(new_status) = &req.status {
        app = set_status(&state.db, app_id, req.user_id, new_status, state.clock.now()).await?;
    }

    Ok(Json(app))
}

#[derive(Deserialize)]
pub struct SentRequest {
    pub user_id: Uuid,
    pub sent_via: String,
}

/// POST /api/v1/applications/:id/sent
pub async fn handle_mark_sent(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
    Json(req): Json<SentRequest>,
) -> Result<Json<ApplicationRow>, AppError> {
    let sent_via = req.sent_via.trim();
    if !matches!(sent_via, "gmail" | "outlook" | "manual") {
        return Err(AppError::Validation(format!(
            "Unknown sent_via channel '{sent_via}'"
        )));
    }

    Ok(Json(
        mark_sent(&state.db, app_id, req.user_id, sent_via, state.clock.now()).await?,
    ))
}

/// DELETE /api/v1/applications/:id
pub async fn handle_delete(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<StatusCode, AppError> {
    let deleted = sqlx::query("DELETE FROM applications WHERE id = $1 AND user_id = $2")
        .bind(app_id)
        .bind(params.user_id)
        .execute(&state.db)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(AppError::NotFound(format!("Application {app_id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct TimelineQuery {
    pub user_id: Uuid,
    #[serde(default = "default_days")]
    pub days: String,
}

fn default_days() -> String {
    "all".to_string()
}

#[derive(Serialize)]
pub struct TimelineResponse {
    pub applications: Vec<ApplicationRow>,
    pub total: usize,
    pub filter: String,
}

/// GET /api/v1/applications/timeline
/// Every returned application carries a non-empty status history; legacy
/// rows get the synthesized `erstellt` entry.
pub async fn handle_timeline(
    State(state): State<AppState>,
    Query(params): Query<TimelineQuery>,
) -> Result<Json<TimelineResponse>, AppError> {
    let days = parse_days_filter(&params.days);
    let applications =
        timeline(&state.db, params.user_id, days, state.clock.now()).await?;

    Ok(Json(TimelineResponse {
        total: applications.len(),
        applications,
        filter: params.days,
    }))
}
