pub mod health;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::applications::handlers as applications;
use crate::billing::handlers as billing;
use crate::skills::handlers as skills;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Applications API
        .route(
            "/api/v1/applications",
            get(applications::handle_list).post(applications::handle_create),
        )
        .route(
            "/api/v1/applications/timeline",
            get(applications::handle_timeline),
        )
        .route(
            "/api/v1/applications/:id",
            get(applications::handle_get)
                .put(applications::handle_update)
                .delete(applications::handle_delete),
        )
        .route(
            "/api/v1/applications/:id/sent",
            post(applications::handle_mark_sent),
        )
        // Skills API
        .route("/api/v1/skills", get(skills::handle_list_skills))
        .route("/api/v1/skills/extract", post(skills::handle_extract))
        .route("/api/v1/skills/:id", delete(skills::handle_delete_skill))
        // Billing API
        .route("/api/v1/billing/usage", get(billing::handle_get_usage))
        .route(
            "/api/v1/billing/subscription",
            get(billing::handle_get_subscription),
        )
        .route(
            "/api/v1/billing/subscription/cancel",
            post(billing::handle_cancel_subscription),
        )
        // Webhooks (public endpoint; authenticity via signature header)
        .route("/api/v1/webhooks/stripe", post(billing::handle_stripe_webhook))
        .with_state(state)
}
