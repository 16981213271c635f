//! Purchase state machine.
//!
//! One row per checkout attempt: `pending` (or `waiting_approval` for manual
//! transfers with submitted evidence) moving exactly once to `completed` or
//! `failed`. The `completed` transition is the only trigger that grants
//! credits or activates a subscription window. The webhook reconcilers and
//! the admin approval path both drive it through the same `complete`/`fail`
//! entry points; there is no second copy of the business logic.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use ajar_shared::PaymentMethod;

use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, BillingEventBuilder, BillingEventLogger, BillingEventType};
use crate::gateway::{midtrans, GatewayRegistry, InvoiceRequest};
use crate::ledger::{ApplyParams, EntryType, LedgerService};
use crate::plans::{BundleType, PlanService};
use crate::subscriptions::SubscriptionService;

/// Checkout state. Monotonic: terminal states are never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(type_name = "purchase_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    Pending,
    WaitingApproval,
    Completed,
    Failed,
}

impl PurchaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PurchaseStatus::Completed | PurchaseStatus::Failed)
    }

    /// Whether a completion or failure may be applied from this state.
    pub fn can_transition(&self) -> bool {
        !self.is_terminal()
    }
}

/// A single checkout attempt against a pricing plan.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Purchase {
    pub id: Uuid,
    pub user_id: Uuid,
    pub pricing_plan_id: Uuid,
    pub bundle_type: BundleType,
    pub credits_granted: Decimal,
    pub amount_paid: Decimal,
    pub payment_status: PurchaseStatus,
    pub payment_method: String,
    pub payment_reference: Option<String>,
    pub subscription_window_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub purchase_date: OffsetDateTime,
}

/// Checkout information handed back to the client.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PaymentInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiry_date: Option<OffsetDateTime>,
}

/// Result of creating a purchase.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedPurchase {
    pub purchase: Purchase,
    pub payment_info: PaymentInfo,
}

const PURCHASE_COLUMNS: &str = "id, user_id, pricing_plan_id, bundle_type, credits_granted, \
     amount_paid, payment_status, payment_method, payment_reference, \
     subscription_window_id, purchase_date";

/// Purchase lifecycle service.
#[derive(Clone)]
pub struct PurchaseService {
    pool: PgPool,
    gateways: GatewayRegistry,
    plans: PlanService,
    events: BillingEventLogger,
}

impl PurchaseService {
    pub fn new(pool: PgPool, gateways: GatewayRegistry) -> Self {
        let plans = PlanService::new(pool.clone());
        let events = BillingEventLogger::new(pool.clone());
        Self {
            pool,
            gateways,
            plans,
            events,
        }
    }

    /// Fetch a purchase by id.
    pub async fn get(&self, purchase_id: Uuid) -> BillingResult<Purchase> {
        let purchase: Option<Purchase> = sqlx::query_as(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1"
        ))
        .bind(purchase_id)
        .fetch_optional(&self.pool)
        .await?;

        purchase.ok_or(BillingError::PurchaseNotFound)
    }

    /// Find a non-terminal purchase by its external payment reference.
    pub async fn find_open_by_reference(&self, reference: &str) -> BillingResult<Option<Purchase>> {
        let purchase: Option<Purchase> = sqlx::query_as(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases \
             WHERE payment_reference = $1 AND payment_status IN ('pending', 'waiting_approval')"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        Ok(purchase)
    }

    /// Initiate a checkout: validate the plan, insert the pending purchase
    /// (plus a `not_active` window placeholder for subscription-bearing
    /// plans), then request an invoice/order from the provider.
    ///
    /// The gateway call happens outside any transaction. If it fails, the
    /// just-created rows are deleted so no orphaned `pending` purchase is
    /// left behind.
    pub async fn create(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        method: PaymentMethod,
    ) -> BillingResult<CreatedPurchase> {
        let plan = self.plans.get_active(plan_id).await?;
        let final_amount = plan.final_amount();

        let mut tx = self.pool.begin().await?;

        let window_id = if plan.bundle_type.grants_subscription() {
            Some(SubscriptionService::create_placeholder_in_tx(&mut tx, user_id).await?)
        } else {
            None
        };

        let purchase: Purchase = sqlx::query_as(&format!(
            r#"
            INSERT INTO purchases
                (user_id, pricing_plan_id, bundle_type, credits_granted, amount_paid,
                 payment_method, subscription_window_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {PURCHASE_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(plan.id)
        .bind(plan.bundle_type)
        .bind(plan.credits_granted)
        .bind(final_amount)
        .bind(method.as_str())
        .bind(window_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let payment_info = match method.provider() {
            Some(provider) => {
                let reference =
                    midtrans::order_id(purchase.id, OffsetDateTime::now_utc().unix_timestamp());
                let request = InvoiceRequest {
                    reference,
                    amount: final_amount,
                    description: format!("{} ({})", plan.name, plan.bundle_type_label()),
                    user_id,
                };

                let invoice = match self
                    .gateways
                    .for_provider(provider)
                    .create_invoice(&request)
                    .await
                {
                    Ok(invoice) => invoice,
                    Err(e) => {
                        self.delete_orphan(purchase.id, window_id).await;
                        tracing::error!(
                            user_id = %user_id,
                            plan_id = %plan_id,
                            provider = %provider,
                            error = %e,
                            "Invoice creation failed, pending purchase compensated"
                        );
                        return Err(e);
                    }
                };

                sqlx::query(
                    "UPDATE purchases SET payment_reference = $1, updated_at = NOW() WHERE id = $2",
                )
                .bind(&invoice.external_id)
                .bind(purchase.id)
                .execute(&self.pool)
                .await?;

                PaymentInfo {
                    invoice_url: invoice.invoice_url,
                    invoice_id: Some(invoice.external_id),
                    expiry_date: invoice.expiry_date,
                }
            }
            None => PaymentInfo::default(),
        };

        if let Err(e) = self
            .events
            .log_event(
                BillingEventBuilder::new(user_id, BillingEventType::PurchaseCreated)
                    .actor_type(ActorType::User)
                    .purchase(purchase.id)
                    .data(serde_json::json!({
                        "plan_id": plan.id,
                        "amount": final_amount,
                        "method": method.as_str(),
                    })),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log purchase created event");
        }

        let purchase = self.get(purchase.id).await?;

        tracing::info!(
            user_id = %user_id,
            purchase_id = %purchase.id,
            plan = %plan.name,
            amount = %final_amount,
            method = %method,
            "Purchase created"
        );

        Ok(CreatedPurchase {
            purchase,
            payment_info,
        })
    }

    /// Record submitted payment evidence for a manual purchase:
    /// `pending -> waiting_approval`.
    pub async fn submit_evidence(
        &self,
        purchase_id: Uuid,
        user_id: Uuid,
        reference: Option<String>,
    ) -> BillingResult<Purchase> {
        let updated: Option<Purchase> = sqlx::query_as(&format!(
            r#"
            UPDATE purchases
            SET payment_status = 'waiting_approval',
                payment_reference = COALESCE($3, payment_reference),
                updated_at = NOW()
            WHERE id = $1 AND user_id = $2 AND payment_method = 'manual'
              AND payment_status = 'pending'
            RETURNING {PURCHASE_COLUMNS}
            "#
        ))
        .bind(purchase_id)
        .bind(user_id)
        .bind(&reference)
        .fetch_optional(&self.pool)
        .await?;

        let purchase = match updated {
            Some(p) => p,
            None => {
                // Distinguish a bad id from a state violation.
                let existing = self.get(purchase_id).await?;
                if existing.user_id != user_id {
                    return Err(BillingError::PurchaseNotFound);
                }
                return Err(BillingError::AlreadyProcessed);
            }
        };

        if let Err(e) = self
            .events
            .log_event(
                BillingEventBuilder::new(user_id, BillingEventType::EvidenceSubmitted)
                    .actor_type(ActorType::User)
                    .purchase(purchase_id),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log evidence submitted event");
        }

        Ok(purchase)
    }

    /// Update the external reference of a still-open purchase. Used for
    /// transitional provider statuses that carry no state change.
    pub async fn update_reference(&self, purchase_id: Uuid, reference: &str) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE purchases
            SET payment_reference = $1, updated_at = NOW()
            WHERE id = $2 AND payment_status IN ('pending', 'waiting_approval')
            "#,
        )
        .bind(reference)
        .bind(purchase_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Complete a purchase: flip to `completed`, grant credits, activate the
    /// subscription window. All three happen in one transaction.
    ///
    /// The status guard runs inside the transaction against a row lock, so a
    /// concurrent duplicate confirmation observes the terminal state and
    /// gets `AlreadyProcessed` instead of double-granting.
    pub async fn complete(&self, purchase_id: Uuid, actor: ActorType) -> BillingResult<Purchase> {
        let mut tx = self.pool.begin().await?;

        let purchase = Self::lock_open(&mut tx, purchase_id).await?;

        sqlx::query(
            "UPDATE purchases SET payment_status = 'completed', updated_at = NOW() WHERE id = $1",
        )
        .bind(purchase_id)
        .execute(&mut *tx)
        .await?;

        if purchase.credits_granted > Decimal::ZERO {
            let entry_type = match purchase.bundle_type {
                BundleType::Subscription => EntryType::SubscriptionBonus,
                BundleType::Credits | BundleType::Hybrid => EntryType::Purchase,
            };
            let method = purchase
                .payment_method
                .parse::<PaymentMethod>()
                .unwrap_or(PaymentMethod::Manual);

            LedgerService::apply_in_tx(
                &mut tx,
                ApplyParams::new(purchase.user_id, entry_type, purchase.credits_granted)
                    .description(format!("Credits from purchase {purchase_id}"))
                    .payment(method, purchase.payment_reference.clone()),
            )
            .await?;
        }

        if purchase.bundle_type.grants_subscription() {
            let duration_days: Option<i32> =
                sqlx::query_scalar("SELECT duration_days FROM pricing_plans WHERE id = $1")
                    .bind(purchase.pricing_plan_id)
                    .fetch_one(&mut *tx)
                    .await?;

            let duration_days = duration_days.unwrap_or_else(|| {
                tracing::warn!(
                    purchase_id = %purchase_id,
                    plan_id = %purchase.pricing_plan_id,
                    "Subscription-bearing plan has no duration, defaulting to 30 days"
                );
                30
            });

            SubscriptionService::activate_in_tx(
                &mut tx,
                purchase.user_id,
                purchase.subscription_window_id,
                duration_days,
            )
            .await?;
        }

        tx.commit().await?;

        if let Err(e) = self
            .events
            .log_event(
                BillingEventBuilder::new(purchase.user_id, BillingEventType::PurchaseCompleted)
                    .actor_type(actor)
                    .purchase(purchase_id)
                    .data(serde_json::json!({
                        "credits_granted": purchase.credits_granted,
                        "bundle_type": purchase.bundle_type,
                    })),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log purchase completed event");
        }

        tracing::info!(
            user_id = %purchase.user_id,
            purchase_id = %purchase_id,
            credits_granted = %purchase.credits_granted,
            "Purchase completed"
        );

        self.get(purchase_id).await
    }

    /// Fail a purchase: flip to `failed` and expire any placeholder window.
    /// No ledger entry is written.
    pub async fn fail(&self, purchase_id: Uuid, actor: ActorType) -> BillingResult<Purchase> {
        let mut tx = self.pool.begin().await?;

        let purchase = Self::lock_open(&mut tx, purchase_id).await?;

        sqlx::query(
            "UPDATE purchases SET payment_status = 'failed', updated_at = NOW() WHERE id = $1",
        )
        .bind(purchase_id)
        .execute(&mut *tx)
        .await?;

        if let Some(window_id) = purchase.subscription_window_id {
            SubscriptionService::expire_placeholder_in_tx(&mut tx, window_id).await?;
        }

        tx.commit().await?;

        if let Err(e) = self
            .events
            .log_event(
                BillingEventBuilder::new(purchase.user_id, BillingEventType::PurchaseFailed)
                    .actor_type(actor)
                    .purchase(purchase_id),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log purchase failed event");
        }

        tracing::info!(
            user_id = %purchase.user_id,
            purchase_id = %purchase_id,
            "Purchase failed"
        );

        self.get(purchase_id).await
    }

    /// Lock the purchase row and verify it is still open.
    async fn lock_open(
        tx: &mut Transaction<'_, Postgres>,
        purchase_id: Uuid,
    ) -> BillingResult<Purchase> {
        let purchase: Option<Purchase> = sqlx::query_as(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1 FOR UPDATE"
        ))
        .bind(purchase_id)
        .fetch_optional(&mut **tx)
        .await?;

        let purchase = purchase.ok_or(BillingError::PurchaseNotFound)?;
        if !purchase.payment_status.can_transition() {
            return Err(BillingError::AlreadyProcessed);
        }
        Ok(purchase)
    }

    /// Best-effort cleanup after a failed gateway call.
    async fn delete_orphan(&self, purchase_id: Uuid, window_id: Option<Uuid>) {
        if let Err(e) = sqlx::query("DELETE FROM purchases WHERE id = $1")
            .bind(purchase_id)
            .execute(&self.pool)
            .await
        {
            tracing::error!(purchase_id = %purchase_id, error = %e, "Failed to delete orphaned purchase");
        }

        if let Some(window_id) = window_id {
            if let Err(e) = sqlx::query("DELETE FROM subscription_windows WHERE id = $1")
                .bind(window_id)
                .execute(&self.pool)
                .await
            {
                tracing::error!(window_id = %window_id, error = %e, "Failed to delete orphaned window");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_cannot_transition() {
        assert!(PurchaseStatus::Pending.can_transition());
        assert!(PurchaseStatus::WaitingApproval.can_transition());
        assert!(!PurchaseStatus::Completed.can_transition());
        assert!(!PurchaseStatus::Failed.can_transition());
    }
}
