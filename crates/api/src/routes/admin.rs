//! Admin endpoints.
//!
//! Approval invokes the same purchase state machine entry points as the
//! webhook reconcilers; only the actor attribution differs.

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ajar_billing::{
    ActorType, ApplyParams, BillingEventBuilder, BillingEventType, EntryType,
    InvariantCheckSummary, LedgerEntry, Purchase,
};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct BonusRequest {
    pub user_id: Uuid,
    pub amount: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BonusResponse {
    pub new_balance: Decimal,
    pub transaction: LedgerEntry,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub status: ApprovalStatus,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Completed,
    Failed,
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /admin/credits/bonus
pub async fn grant_bonus(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Json(body): Json<BonusRequest>,
) -> ApiResult<Json<BonusResponse>> {
    if body.amount <= Decimal::ZERO {
        return Err(ApiError::BadRequest("amount must be positive".to_string()));
    }

    let applied = state
        .billing
        .ledger
        .apply(
            ApplyParams::new(body.user_id, EntryType::Bonus, body.amount).description(
                body.description
                    .unwrap_or_else(|| "Admin bonus".to_string()),
            ),
        )
        .await?;

    if let Err(e) = state
        .billing
        .events
        .log_event(
            BillingEventBuilder::new(body.user_id, BillingEventType::BonusGranted)
                .actor_type(ActorType::Admin)
                .data(serde_json::json!({
                    "amount": body.amount,
                    "granted_by": admin.user_id,
                })),
        )
        .await
    {
        tracing::warn!(error = %e, "Failed to log bonus event");
    }

    tracing::info!(
        admin_id = %admin.user_id,
        user_id = %body.user_id,
        amount = %body.amount,
        "Admin bonus granted"
    );

    Ok(Json(BonusResponse {
        new_balance: applied.new_balance,
        transaction: applied.entry,
    }))
}

/// POST /admin/purchases/{id}/approve
///
/// Manual confirmation for offline payment methods. Unknown purchases get a
/// 404; already-terminal purchases get a 409 (unlike webhooks, operators see
/// the idempotency short-circuit).
pub async fn approve_purchase(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(purchase_id): Path<Uuid>,
    Json(body): Json<ApproveRequest>,
) -> ApiResult<Json<Purchase>> {
    let purchase = match body.status {
        ApprovalStatus::Completed => {
            state
                .billing
                .purchases
                .complete(purchase_id, ActorType::Admin)
                .await?
        }
        ApprovalStatus::Failed => {
            state
                .billing
                .purchases
                .fail(purchase_id, ActorType::Admin)
                .await?
        }
    };

    tracing::info!(
        admin_id = %admin.user_id,
        purchase_id = %purchase_id,
        status = ?body.status,
        "Purchase manually approved"
    );

    Ok(Json(purchase))
}

/// GET /admin/billing/invariants
pub async fn run_invariants(
    State(state): State<AppState>,
) -> ApiResult<Json<InvariantCheckSummary>> {
    let summary = state.billing.invariants.run_all_checks().await?;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_status_deserializes_from_snake_case() {
        let completed: ApprovalStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(completed, ApprovalStatus::Completed);
        let failed: ApprovalStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(failed, ApprovalStatus::Failed);
        assert!(serde_json::from_str::<ApprovalStatus>("\"refunded\"").is_err());
    }
}
