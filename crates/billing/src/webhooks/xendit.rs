//! Xendit invoice callback reconciler.
//!
//! Xendit authenticates callbacks with a shared `x-callback-token` header.
//! The body carries Xendit's own invoice `id` (stored as the purchase's
//! payment reference at checkout) plus our `external_id`, which doubles as a
//! fallback resolution path.

use serde::Deserialize;
use sqlx::PgPool;
use subtle::ConstantTimeEq;

use ajar_shared::PaymentProvider;

use crate::error::{BillingError, BillingResult};
use crate::events::ActorType;
use crate::gateway::midtrans::parse_order_id;
use crate::purchases::{Purchase, PurchaseService};
use crate::webhooks::{claim_event, record_result, ReconcileOutcome};

/// Shared callback token.
#[derive(Debug, Clone)]
pub struct XenditWebhookConfig {
    pub callback_token: String,
}

impl XenditWebhookConfig {
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            callback_token: std::env::var("XENDIT_CALLBACK_TOKEN").map_err(|_| {
                BillingError::Gateway("XENDIT_CALLBACK_TOKEN is not set".to_string())
            })?,
        })
    }
}

/// The fields of a Xendit invoice callback this service acts on.
#[derive(Debug, Clone, Deserialize)]
pub struct XenditInvoiceCallback {
    /// Xendit's invoice id.
    pub id: String,
    /// The external id we supplied at invoice creation.
    pub external_id: String,
    pub status: String,
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusAction {
    Complete,
    Fail,
    Ignore,
}

fn map_status(status: &str) -> StatusAction {
    match status {
        "PAID" | "SETTLED" => StatusAction::Complete,
        "EXPIRED" => StatusAction::Fail,
        _ => StatusAction::Ignore,
    }
}

/// Reconciler for `POST /webhooks/xendit/invoice`.
#[derive(Clone)]
pub struct XenditReconciler {
    config: XenditWebhookConfig,
    pool: PgPool,
    purchases: PurchaseService,
}

impl XenditReconciler {
    pub fn new(config: XenditWebhookConfig, pool: PgPool, purchases: PurchaseService) -> Self {
        Self {
            config,
            pool,
            purchases,
        }
    }

    /// Verify the `x-callback-token` header. Constant-time comparison; no
    /// mutation happens before this passes.
    pub fn verify(&self, callback_token: Option<&str>) -> BillingResult<()> {
        let supplied = callback_token.unwrap_or_default();
        let matches: bool = supplied
            .as_bytes()
            .ct_eq(self.config.callback_token.as_bytes())
            .into();

        if !matches {
            tracing::warn!("Xendit callback token mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }
        Ok(())
    }

    /// Process a verified callback.
    pub async fn handle(
        &self,
        callback: &XenditInvoiceCallback,
    ) -> BillingResult<ReconcileOutcome> {
        let event_key = format!("xendit:{}:{}", callback.id, callback.status);
        if !claim_event(
            &self.pool,
            PaymentProvider::Xendit,
            &event_key,
            &callback.status,
        )
        .await?
        {
            return Ok(ReconcileOutcome::Ignored);
        }

        let result = self.process(callback).await;

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

    async fn process(&self, callback: &XenditInvoiceCallback) -> BillingResult<ReconcileOutcome> {
        let action = map_status(&callback.status);

        tracing::info!(
            invoice_id = %callback.id,
            external_id = %callback.external_id,
            status = %callback.status,
            payment_method = ?callback.payment_method,
            action = ?action,
            "Processing Xendit invoice callback"
        );

        if action == StatusAction::Ignore {
            // Transitional statuses carry no state change; at most refresh
            // the stored reference when the invoice was resolved through the
            // external-id fallback.
            if let Some(purchase) = self.resolve(callback).await? {
                if purchase.payment_reference.as_deref() != Some(callback.id.as_str()) {
                    self.purchases
                        .update_reference(purchase.id, &callback.id)
                        .await?;
                    return Ok(ReconcileOutcome::ReferenceUpdated);
                }
            }
            return Ok(ReconcileOutcome::Ignored);
        }

        let purchase = match self.resolve(callback).await? {
            Some(purchase) => purchase,
            None => {
                // Already terminal or unknown: redeliveries must be a no-op,
                // not an error.
                tracing::info!(
                    invoice_id = %callback.id,
                    "No open purchase matches callback, acknowledging"
                );
                return Ok(ReconcileOutcome::Ignored);
            }
        };

        let transition = match action {
            StatusAction::Complete => self.purchases.complete(purchase.id, ActorType::Xendit).await,
            StatusAction::Fail => self.purchases.fail(purchase.id, ActorType::Xendit).await,
            StatusAction::Ignore => return Ok(ReconcileOutcome::Ignored),
        };

        match transition {
            Ok(_) => Ok(match action {
                StatusAction::Complete => ReconcileOutcome::Completed,
                _ => ReconcileOutcome::Failed,
            }),
            Err(BillingError::AlreadyProcessed) | Err(BillingError::PurchaseNotFound) => {
                Ok(ReconcileOutcome::Ignored)
            }
            Err(e) => Err(e),
        }
    }

    /// Match by the stored Xendit invoice id first, then fall back to the
    /// purchase id embedded in our external id.
    async fn resolve(&self, callback: &XenditInvoiceCallback) -> BillingResult<Option<Purchase>> {
        if let Some(purchase) = self.purchases.find_open_by_reference(&callback.id).await? {
            return Ok(Some(purchase));
        }

        if let Some(purchase_id) = parse_order_id(&callback.external_id) {
            match self.purchases.get(purchase_id).await {
                Ok(purchase) if purchase.payment_status.can_transition() => {
                    return Ok(Some(purchase))
                }
                Ok(_) => return Ok(None),
                Err(BillingError::PurchaseNotFound) => return Ok(None),
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paid_and_settled_complete() {
        assert_eq!(map_status("PAID"), StatusAction::Complete);
        assert_eq!(map_status("SETTLED"), StatusAction::Complete);
    }

    #[test]
    fn expired_fails() {
        assert_eq!(map_status("EXPIRED"), StatusAction::Fail);
    }

    #[test]
    fn unknown_statuses_are_ignored() {
        assert_eq!(map_status("PENDING"), StatusAction::Ignore);
        assert_eq!(map_status(""), StatusAction::Ignore);
        assert_eq!(map_status("paid"), StatusAction::Ignore);
    }
}
