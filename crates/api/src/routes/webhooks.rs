//! Payment provider webhook endpoints.
//!
//! Providers retry on any non-2xx response. Once an event has been durably
//! claimed, internal processing failures are logged and still answered with
//! 200 so retry storms cannot amplify load; only authentication failures are
//! rejected, with 401 and no mutation.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::json;

use ajar_billing::{BillingError, MidtransNotification, XenditInvoiceCallback};

use crate::state::AppState;

/// POST /webhooks/midtrans/notification
pub async fn midtrans_notification(
    State(state): State<AppState>,
    Json(notification): Json<MidtransNotification>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.billing.midtrans_webhook.handle(&notification).await {
        Ok(outcome) => {
            tracing::info!(
                order_id = %notification.order_id,
                outcome = ?outcome,
                "Midtrans notification processed"
            );
            (StatusCode::OK, Json(json!({ "status": "ok" })))
        }
        Err(BillingError::WebhookSignatureInvalid) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "status": "invalid signature" })),
        ),
        Err(e) => {
            // Processed-with-error still acknowledges; the failure is in the
            // event audit row and the logs, not the provider's retry queue.
            tracing::error!(
                order_id = %notification.order_id,
                error = %e,
                "Midtrans notification processing failed"
            );
            (StatusCode::OK, Json(json!({ "status": "ok" })))
        }
    }
}

/// POST /webhooks/xendit/invoice
pub async fn xendit_invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(callback): Json<XenditInvoiceCallback>,
) -> (StatusCode, Json<serde_json::Value>) {
    let token = headers
        .get("x-callback-token")
        .and_then(|v| v.to_str().ok());

    if state.billing.xendit_webhook.verify(token).is_err() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "status": "invalid callback token" })),
        );
    }

    match state.billing.xendit_webhook.handle(&callback).await {
        Ok(outcome) => {
            tracing::info!(
                invoice_id = %callback.id,
                outcome = ?outcome,
                "Xendit callback processed"
            );
            (StatusCode::OK, Json(json!({ "status": "ok" })))
        }
        Err(e) => {
            tracing::error!(
                invoice_id = %callback.id,
                error = %e,
                "Xendit callback processing failed"
            );
            (StatusCode::OK, Json(json!({ "status": "ok" })))
        }
    }
}
