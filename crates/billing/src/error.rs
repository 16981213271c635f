//! Billing error taxonomy.

use rust_decimal::Decimal;

/// Errors produced by the billing crate.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// A deduction would take the balance below zero. Recovered locally and
    /// surfaced to the caller as a 400.
    #[error("insufficient funds: balance {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },

    /// Webhook signature or callback token did not verify. No mutation is
    /// performed for these requests.
    #[error("webhook signature invalid")]
    WebhookSignatureInvalid,

    /// No purchase matches the given id or external reference.
    #[error("purchase not found")]
    PurchaseNotFound,

    /// The requested pricing plan does not exist.
    #[error("pricing plan not found")]
    PlanNotFound,

    /// The requested pricing plan exists but is not purchasable.
    #[error("pricing plan is not active")]
    PlanInactive,

    /// The purchase is already in a terminal state. Webhook paths treat this
    /// as a successful no-op; the admin path surfaces it as a conflict.
    #[error("purchase already processed")]
    AlreadyProcessed,

    /// Amount failed validation (zero, negative, or otherwise malformed).
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The external invoice/order creation call failed. The caller
    /// compensates by deleting the pending purchase.
    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

/// Result type for billing operations.
pub type BillingResult<T> = Result<T, BillingError>;
