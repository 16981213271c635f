//! Credit endpoints: balance, deduction, history, plans, checkout.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ajar_billing::{
    ActorType, ApplyParams, BillingEventBuilder, BillingEventType, CreatedPurchase, EntryType,
    LedgerEntry, PricingPlan, Purchase, SubscriptionWindow,
};
use ajar_shared::PaymentMethod;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct DeductRequest {
    pub amount: Decimal,
    pub description: Option<String>,
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct DeductResponse {
    pub new_balance: Decimal,
    pub transaction: LedgerEntry,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub transactions: Vec<LedgerEntry>,
}

#[derive(Debug, Serialize)]
pub struct PlansResponse {
    pub plans: Vec<PricingPlan>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub plan_id: Uuid,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Deserialize)]
pub struct EvidenceRequest {
    pub reference: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<SubscriptionWindow>,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /credits/balance
///
/// Lazily creates the balance row at 0 on first call.
pub async fn get_balance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<BalanceResponse>> {
    let balance = state.billing.ledger.balance(user.user_id).await?;
    Ok(Json(BalanceResponse { balance }))
}

/// POST /credits/deduct
///
/// Deducts credits for a metered feature. Fails with 400 INSUFFICIENT_FUNDS
/// when the balance cannot cover the amount; balance and ledger are left
/// untouched in that case.
pub async fn deduct(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<DeductRequest>,
) -> ApiResult<Json<DeductResponse>> {
    if body.amount <= Decimal::ZERO {
        return Err(ApiError::BadRequest("amount must be positive".to_string()));
    }

    let applied = state
        .billing
        .ledger
        .apply(
            ApplyParams::new(user.user_id, EntryType::Deduction, body.amount)
                .description(
                    body.description
                        .unwrap_or_else(|| "Feature usage".to_string()),
                )
                .session(body.session_id),
        )
        .await?;

    if let Err(e) = state
        .billing
        .events
        .log_event(
            BillingEventBuilder::new(user.user_id, BillingEventType::CreditsDeducted)
                .actor_type(ActorType::User)
                .data(serde_json::json!({ "amount": body.amount })),
        )
        .await
    {
        tracing::warn!(error = %e, "Failed to log deduction event");
    }

    Ok(Json(DeductResponse {
        new_balance: applied.new_balance,
        transaction: applied.entry,
    }))
}

/// GET /credits/history
pub async fn history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let transactions = state
        .billing
        .ledger
        .history(
            user.user_id,
            query.limit.unwrap_or(50),
            query.offset.unwrap_or(0),
        )
        .await?;

    Ok(Json(HistoryResponse { transactions }))
}

/// GET /credits/plans
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<PlansResponse>> {
    let plans = state.billing.plans.list_active().await?;
    Ok(Json(PlansResponse { plans }))
}

/// GET /credits/subscription
///
/// The caller's active subscription window, if any.
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let window = state
        .billing
        .subscriptions
        .current_active(user.user_id)
        .await?;

    Ok(Json(SubscriptionResponse {
        active: window.is_some(),
        window,
    }))
}

/// POST /credits/purchase
///
/// Creates a pending purchase and, for provider-backed methods, an external
/// invoice. Returns 201 with the payment info the client needs to continue
/// checkout.
pub async fn purchase(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<PurchaseRequest>,
) -> ApiResult<(StatusCode, Json<CreatedPurchase>)> {
    let created = state
        .billing
        .purchases
        .create(user.user_id, body.plan_id, body.payment_method)
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// POST /credits/purchase/{id}/evidence
///
/// Marks a manual purchase as waiting for operator approval once the user
/// submits transfer evidence.
pub async fn submit_evidence(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(purchase_id): Path<Uuid>,
    Json(body): Json<EvidenceRequest>,
) -> ApiResult<Json<Purchase>> {
    let purchase = state
        .billing
        .purchases
        .submit_evidence(purchase_id, user.user_id, body.reference)
        .await?;

    Ok(Json(purchase))
}
