//! Midtrans notification reconciler.
//!
//! Midtrans signs each notification with
//! `sha512(order_id + status_code + gross_amount + server_key)`. Order ids in
//! the `PURCHASE-{id}-{ts}` format resolve to a purchase; anything else goes
//! through the legacy top-up path, which matches a pending ledger entry by
//! its stored reference.

use serde::Deserialize;
use sha2::{Digest, Sha512};
use sqlx::PgPool;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use ajar_shared::PaymentProvider;

use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, BillingEventBuilder, BillingEventLogger, BillingEventType};
use crate::gateway::midtrans::parse_order_id;
use crate::ledger::LedgerService;
use crate::purchases::PurchaseService;
use crate::webhooks::{claim_event, record_result, ReconcileOutcome};

/// Shared secret for notification verification.
#[derive(Debug, Clone)]
pub struct MidtransWebhookConfig {
    pub server_key: String,
}

impl MidtransWebhookConfig {
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            server_key: std::env::var("MIDTRANS_SERVER_KEY")
                .map_err(|_| BillingError::Gateway("MIDTRANS_SERVER_KEY is not set".to_string()))?,
        })
    }
}

/// The fields of a Midtrans HTTP notification this service acts on.
#[derive(Debug, Clone, Deserialize)]
pub struct MidtransNotification {
    pub order_id: String,
    pub status_code: String,
    pub gross_amount: String,
    pub signature_key: String,
    pub transaction_status: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// Expected signature for a notification.
pub fn midtrans_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// The internal transition a provider status maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusAction {
    Complete,
    Fail,
    UpdateReference,
    Ignore,
}

fn map_status(transaction_status: &str, fraud_status: Option<&str>) -> StatusAction {
    match transaction_status {
        "settlement" => StatusAction::Complete,
        // Card payments settle as "capture"; only fraud-accepted captures
        // count as paid. "challenge" stays open pending manual review.
        "capture" => match fraud_status {
            Some("accept") | None => StatusAction::Complete,
            Some("challenge") => StatusAction::UpdateReference,
            Some(_) => StatusAction::Fail,
        },
        "deny" | "cancel" | "expire" => StatusAction::Fail,
        "pending" => StatusAction::UpdateReference,
        _ => StatusAction::Ignore,
    }
}

/// Reconciler for `POST /webhooks/midtrans/notification`.
#[derive(Clone)]
pub struct MidtransReconciler {
    config: MidtransWebhookConfig,
    pool: PgPool,
    purchases: PurchaseService,
    events: BillingEventLogger,
}

impl MidtransReconciler {
    pub fn new(config: MidtransWebhookConfig, pool: PgPool, purchases: PurchaseService) -> Self {
        let events = BillingEventLogger::new(pool.clone());
        Self {
            config,
            pool,
            purchases,
            events,
        }
    }

    /// Verify the notification signature. Constant-time comparison; no
    /// mutation happens before this passes.
    pub fn verify(&self, notification: &MidtransNotification) -> BillingResult<()> {
        let expected = midtrans_signature(
            &notification.order_id,
            &notification.status_code,
            &notification.gross_amount,
            &self.config.server_key,
        );

        let matches: bool = expected
            .as_bytes()
            .ct_eq(notification.signature_key.as_bytes())
            .into();

        if !matches {
            tracing::warn!(
                order_id = %notification.order_id,
                "Midtrans notification signature mismatch"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }
        Ok(())
    }

    /// Process a verified notification. Never double-grants: duplicates fall
    /// out at the event claim, and the purchase transition re-checks state
    /// under a row lock.
    pub async fn handle(
        &self,
        notification: &MidtransNotification,
    ) -> BillingResult<ReconcileOutcome> {
        self.verify(notification)?;

        let event_key = format!(
            "midtrans:{}:{}",
            notification.order_id, notification.transaction_status
        );
        if !claim_event(
            &self.pool,
            PaymentProvider::Midtrans,
            &event_key,
            &notification.transaction_status,
        )
        .await?
        {
            return Ok(ReconcileOutcome::Ignored);
        }

        let result = self.process(notification).await;

        match &result {
            Ok(outcome) => {
                record_result(&self.pool, &event_key, Ok(*outcome)).await;
            }
            Err(e) => {
                let message = e.to_string();
                record_result(&self.pool, &event_key, Err(&message)).await;
            }
        }

        result
    }

    async fn process(
        &self,
        notification: &MidtransNotification,
    ) -> BillingResult<ReconcileOutcome> {
        let action = map_status(
            &notification.transaction_status,
            notification.fraud_status.as_deref(),
        );

        tracing::info!(
            order_id = %notification.order_id,
            transaction_status = %notification.transaction_status,
            fraud_status = ?notification.fraud_status,
            payment_type = ?notification.payment_type,
            action = ?action,
            "Processing Midtrans notification"
        );

        match parse_order_id(&notification.order_id) {
            Some(purchase_id) => self.apply_to_purchase(purchase_id, notification, action).await,
            None => self.apply_to_legacy_topup(notification, action).await,
        }
    }

    async fn apply_to_purchase(
        &self,
        purchase_id: Uuid,
        notification: &MidtransNotification,
        action: StatusAction,
    ) -> BillingResult<ReconcileOutcome> {
        match action {
            StatusAction::Complete => {
                match self.purchases.complete(purchase_id, ActorType::Midtrans).await {
                    Ok(_) => Ok(ReconcileOutcome::Completed),
                    // Redelivered or raced: the record already reached a
                    // terminal state, acknowledge without mutating.
                    Err(BillingError::AlreadyProcessed) | Err(BillingError::PurchaseNotFound) => {
                        Ok(ReconcileOutcome::Ignored)
                    }
                    Err(e) => Err(e),
                }
            }
            StatusAction::Fail => {
                match self.purchases.fail(purchase_id, ActorType::Midtrans).await {
                    Ok(_) => Ok(ReconcileOutcome::Failed),
                    Err(BillingError::AlreadyProcessed) | Err(BillingError::PurchaseNotFound) => {
                        Ok(ReconcileOutcome::Ignored)
                    }
                    Err(e) => Err(e),
                }
            }
            StatusAction::UpdateReference => {
                let reference = notification
                    .transaction_id
                    .as_deref()
                    .unwrap_or(&notification.order_id);
                self.purchases.update_reference(purchase_id, reference).await?;
                Ok(ReconcileOutcome::ReferenceUpdated)
            }
            StatusAction::Ignore => Ok(ReconcileOutcome::Ignored),
        }
    }

    /// Legacy top-up entries predate the purchase-plan flow and are matched
    /// by the reference stored on the pending ledger row: exact match first,
    /// then a prefix match with the trailing timestamp segment stripped.
    /// When several rows match the prefix (concurrent top-ups by the same
    /// user under the legacy scheme), the most recent one is treated as
    /// authoritative.
    async fn apply_to_legacy_topup(
        &self,
        notification: &MidtransNotification,
        action: StatusAction,
    ) -> BillingResult<ReconcileOutcome> {
        if !matches!(action, StatusAction::Complete | StatusAction::Fail) {
            return Ok(ReconcileOutcome::Ignored);
        }

        let entry = match self.resolve_legacy_entry(&notification.order_id).await? {
            Some(entry) => entry,
            None => {
                tracing::info!(
                    order_id = %notification.order_id,
                    "No pending legacy top-up matches notification, acknowledging"
                );
                return Ok(ReconcileOutcome::Ignored);
            }
        };
        let (entry_id, user_id) = entry;

        let mut tx = self.pool.begin().await?;
        let outcome = match action {
            StatusAction::Complete => {
                match LedgerService::complete_pending_in_tx(&mut tx, entry_id).await {
                    Ok(_) => ReconcileOutcome::Completed,
                    Err(BillingError::AlreadyProcessed) => {
                        tx.rollback().await.ok();
                        return Ok(ReconcileOutcome::Ignored);
                    }
                    Err(e) => {
                        tx.rollback().await.ok();
                        return Err(e);
                    }
                }
            }
            StatusAction::Fail => match LedgerService::fail_pending_in_tx(&mut tx, entry_id).await {
                Ok(()) => ReconcileOutcome::Failed,
                Err(BillingError::AlreadyProcessed) => {
                    tx.rollback().await.ok();
                    return Ok(ReconcileOutcome::Ignored);
                }
                Err(e) => {
                    tx.rollback().await.ok();
                    return Err(e);
                }
            },
            _ => unreachable!("guarded above"),
        };
        tx.commit().await?;

        let event_type = match outcome {
            ReconcileOutcome::Completed => BillingEventType::LegacyTopupCompleted,
            _ => BillingEventType::LegacyTopupFailed,
        };
        if let Err(e) = self
            .events
            .log_event(
                BillingEventBuilder::new(user_id, event_type)
                    .actor_type(ActorType::Midtrans)
                    .payment_reference(&notification.order_id),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log legacy top-up event");
        }

        Ok(outcome)
    }

    async fn resolve_legacy_entry(&self, order_id: &str) -> BillingResult<Option<(Uuid, Uuid)>> {
        let exact: Option<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            SELECT id, user_id FROM credit_transactions
            WHERE payment_status = 'pending' AND payment_reference = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        if exact.is_some() {
            return Ok(exact);
        }

        // References are internally generated ({PREFIX}-{id}-{timestamp});
        // dropping the timestamp segment recovers the stored stem.
        let prefix = match order_id.rsplit_once('-') {
            Some((stem, _ts)) if !stem.is_empty() => stem,
            _ => return Ok(None),
        };

        let by_prefix: Option<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            SELECT id, user_id FROM credit_transactions
            WHERE payment_status = 'pending' AND payment_reference LIKE $1 || '%'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(prefix)
        .fetch_optional(&self.pool)
        .await?;

        Ok(by_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_known_vector() {
        // sha512 of "ORDER-1" + "200" + "10000.00" + "secret"
        let sig = midtrans_signature("ORDER-1", "200", "10000.00", "secret");
        assert_eq!(sig.len(), 128);
        assert_eq!(sig, midtrans_signature("ORDER-1", "200", "10000.00", "secret"));
        assert_ne!(sig, midtrans_signature("ORDER-2", "200", "10000.00", "secret"));
        assert_ne!(sig, midtrans_signature("ORDER-1", "200", "10000.00", "other"));
    }

    #[test]
    fn settlement_and_accepted_capture_complete() {
        assert_eq!(map_status("settlement", None), StatusAction::Complete);
        assert_eq!(map_status("capture", Some("accept")), StatusAction::Complete);
        assert_eq!(map_status("capture", None), StatusAction::Complete);
    }

    #[test]
    fn challenged_capture_stays_open() {
        assert_eq!(
            map_status("capture", Some("challenge")),
            StatusAction::UpdateReference
        );
    }

    #[test]
    fn terminal_failures_fail() {
        assert_eq!(map_status("deny", None), StatusAction::Fail);
        assert_eq!(map_status("cancel", None), StatusAction::Fail);
        assert_eq!(map_status("expire", None), StatusAction::Fail);
        assert_eq!(map_status("capture", Some("deny")), StatusAction::Fail);
    }

    #[test]
    fn transitional_and_unknown_statuses_do_not_transition() {
        assert_eq!(map_status("pending", None), StatusAction::UpdateReference);
        assert_eq!(map_status("refund", None), StatusAction::Ignore);
        assert_eq!(map_status("authorize", None), StatusAction::Ignore);
    }
}
