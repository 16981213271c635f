//! Payment webhook reconciliation.
//!
//! Turns inbound provider events into verified, idempotent state
//! transitions. Both reconcilers follow the same shape: authenticate, claim
//! the event, resolve the target purchase (or legacy top-up), map the
//! provider status onto the purchase state machine, and record the result.
//! Providers retry on anything but a success-class response, so the HTTP
//! layer answers 200 once an event has been durably processed even when the
//! internal handling failed; only authentication failures are rejected.

mod midtrans;
mod xendit;

pub use midtrans::{
    midtrans_signature, MidtransNotification, MidtransReconciler, MidtransWebhookConfig,
};
pub use xendit::{XenditInvoiceCallback, XenditReconciler, XenditWebhookConfig};

use sqlx::PgPool;

use ajar_shared::PaymentProvider;

use crate::error::BillingResult;

/// What a reconciled event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The purchase (or legacy top-up) transitioned to completed.
    Completed,
    /// The purchase (or legacy top-up) transitioned to failed.
    Failed,
    /// Transitional status: only the payment reference was refreshed.
    ReferenceUpdated,
    /// Nothing to do: duplicate delivery, already-terminal target, unknown
    /// reference, or a status we do not act on. Acknowledged as success.
    Ignored,
}

/// Events stuck in `processing` longer than this are presumed crashed and
/// may be re-claimed.
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// Atomically claim exclusive processing rights for a provider event.
///
/// The INSERT ... ON CONFLICT ... RETURNING pattern guarantees only one
/// concurrent delivery claims the event; duplicates observe the conflict and
/// get `false`. A claim that never completed (crashed worker) is recoverable
/// after a timeout.
pub(crate) async fn claim_event(
    pool: &PgPool,
    provider: PaymentProvider,
    event_key: &str,
    event_type: &str,
) -> BillingResult<bool> {
    let claimed: Option<(uuid::Uuid,)> = sqlx::query_as(
        r#"
        INSERT INTO payment_webhook_events
            (provider, event_key, event_type, processing_result, processing_started_at)
        VALUES ($1, $2, $3, 'processing', NOW())
        ON CONFLICT (event_key) DO UPDATE SET
            processing_result = 'processing',
            processing_started_at = NOW(),
            error_message = CONCAT('Recovered from stuck state at ', NOW()::TEXT)
        WHERE payment_webhook_events.processing_result = 'processing'
          AND payment_webhook_events.processing_started_at < NOW() - ($4 || ' minutes')::INTERVAL
        RETURNING id
        "#,
    )
    .bind(provider.as_str())
    .bind(event_key)
    .bind(event_type)
    .bind(PROCESSING_TIMEOUT_MINUTES.to_string())
    .fetch_optional(pool)
    .await?;

    if claimed.is_none() {
        tracing::info!(
            provider = %provider,
            event_key = %event_key,
            "Duplicate webhook event - atomic idempotency check"
        );
    }

    Ok(claimed.is_some())
}

/// Record the processing result for a claimed event.
///
/// Retried once; the audit row matters for idempotency, and a row stuck in
/// `processing` blocks redelivery until the recovery timeout.
pub(crate) async fn record_result(
    pool: &PgPool,
    event_key: &str,
    result: Result<ReconcileOutcome, &str>,
) {
    let (processing_result, error_message) = match result {
        Ok(_) => ("success", None),
        Err(e) => ("error", Some(e.to_string())),
    };

    for attempt in 0..2 {
        let update = sqlx::query(
            "UPDATE payment_webhook_events SET processing_result = $1, error_message = $2 WHERE event_key = $3",
        )
        .bind(processing_result)
        .bind(&error_message)
        .bind(event_key)
        .execute(pool)
        .await;

        match update {
            Ok(_) => return,
            Err(e) if attempt == 0 => {
                tracing::warn!(
                    event_key = %event_key,
                    error = %e,
                    "First attempt to update webhook event failed, retrying..."
                );
            }
            Err(e) => {
                tracing::error!(
                    event_key = %event_key,
                    processing_result = %processing_result,
                    error = %e,
                    "Failed to update webhook audit record after retry; event may appear stuck in 'processing'"
                );
            }
        }
    }
}

/// Re-claim events whose worker died mid-processing. Run by the worker; the
/// rows become eligible for redelivery once marked.
pub async fn recover_stuck_events(pool: &PgPool) -> BillingResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE payment_webhook_events
        SET processing_result = 'error',
            error_message = 'Recovered: processing exceeded timeout'
        WHERE processing_result = 'processing'
          AND processing_started_at < NOW() - ($1 || ' minutes')::INTERVAL
        "#,
    )
    .bind(PROCESSING_TIMEOUT_MINUTES.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
