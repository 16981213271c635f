// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::result_large_err)] // BillingError carries decimal context on funds errors
#![allow(clippy::too_many_arguments)] // Some ledger operations require many parameters
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Ajar Billing Module
//!
//! The credit ledger and payment reconciliation core.
//!
//! ## Features
//!
//! - **Credit Ledger**: Append-only transaction log with before/after balance
//!   snapshots; the only code path that mutates balances
//! - **Purchases**: Checkout state machine (pending → completed/failed) with
//!   delete-compensation when invoice creation fails
//! - **Subscriptions**: Placeholder/activation windows with renewal stacking
//! - **Gateways**: Midtrans Snap and Xendit Invoice clients behind an
//!   injectable trait
//! - **Webhooks**: Idempotent reconcilers for both providers
//! - **Invariants**: Runnable consistency checks over the whole ledger

pub mod error;
pub mod events;
pub mod gateway;
pub mod invariants;
pub mod ledger;
pub mod plans;
pub mod purchases;
pub mod subscriptions;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{ActorType, BillingEventBuilder, BillingEventLogger, BillingEventType};

// Gateway
pub use gateway::{
    GatewayInvoice, GatewayRegistry, InvoiceRequest, MidtransConfig, MidtransGateway,
    PaymentGateway, XenditConfig, XenditGateway,
};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Ledger
pub use ledger::{
    signed_amount, ApplyParams, EntryType, LedgerApplication, LedgerEntry, LedgerService,
    PaymentStatus,
};

// Plans
pub use plans::{BundleType, PlanService, PricingPlan};

// Purchases
pub use purchases::{CreatedPurchase, PaymentInfo, Purchase, PurchaseService, PurchaseStatus};

// Subscriptions
pub use subscriptions::{SubscriptionService, SubscriptionStatus, SubscriptionWindow};

// Webhooks
pub use webhooks::{
    midtrans_signature, MidtransNotification, MidtransReconciler, MidtransWebhookConfig,
    ReconcileOutcome, XenditInvoiceCallback, XenditReconciler, XenditWebhookConfig,
};

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub ledger: LedgerService,
    pub plans: PlanService,
    pub purchases: PurchaseService,
    pub subscriptions: SubscriptionService,
    pub events: BillingEventLogger,
    pub midtrans_webhook: MidtransReconciler,
    pub xendit_webhook: XenditReconciler,
    pub invariants: InvariantChecker,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let gateways = GatewayRegistry::from_env()?;
        let midtrans_config = MidtransWebhookConfig::from_env()?;
        let xendit_config = XenditWebhookConfig::from_env()?;
        Ok(Self::new(pool, gateways, midtrans_config, xendit_config))
    }

    /// Create a new billing service with explicit gateway and webhook config
    pub fn new(
        pool: PgPool,
        gateways: GatewayRegistry,
        midtrans_config: MidtransWebhookConfig,
        xendit_config: XenditWebhookConfig,
    ) -> Self {
        let purchases = PurchaseService::new(pool.clone(), gateways);

        Self {
            ledger: LedgerService::new(pool.clone()),
            plans: PlanService::new(pool.clone()),
            subscriptions: SubscriptionService::new(pool.clone()),
            events: BillingEventLogger::new(pool.clone()),
            midtrans_webhook: MidtransReconciler::new(
                midtrans_config,
                pool.clone(),
                purchases.clone(),
            ),
            xendit_webhook: XenditReconciler::new(xendit_config, pool.clone(), purchases.clone()),
            invariants: InvariantChecker::new(pool),
            purchases,
        }
    }
}
