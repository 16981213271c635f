//! Route assembly.

pub mod admin;
pub mod credits;
pub mod webhooks;

use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};

use crate::auth::{require_admin, require_auth};
use crate::state::AppState;

/// Build the full application router.
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    let user_routes = Router::new()
        .route("/credits/balance", get(credits::get_balance))
        .route("/credits/deduct", post(credits::deduct))
        .route("/credits/history", get(credits::history))
        .route("/credits/plans", get(credits::list_plans))
        .route("/credits/subscription", get(credits::get_subscription))
        .route("/credits/purchase", post(credits::purchase))
        .route(
            "/credits/purchase/{id}/evidence",
            post(credits::submit_evidence),
        )
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            require_auth,
        ));

    let admin_routes = Router::new()
        .route("/admin/credits/bonus", post(admin::grant_bonus))
        .route("/admin/purchases/{id}/approve", post(admin::approve_purchase))
        .route("/admin/billing/invariants", get(admin::run_invariants))
        .layer(middleware::from_fn_with_state(auth_state, require_admin));

    let webhook_routes = Router::new()
        .route(
            "/webhooks/midtrans/notification",
            post(webhooks::midtrans_notification),
        )
        .route("/webhooks/xendit/invoice", post(webhooks::xendit_invoice));

    Router::new()
        .route("/health", get(health))
        .merge(user_routes)
        .merge(admin_routes)
        .merge(webhook_routes)
        .with_state(state)
}

/// Liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
