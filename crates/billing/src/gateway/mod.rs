//! Payment gateway clients.
//!
//! Each provider is reached through the [`PaymentGateway`] trait and injected
//! where needed, so tests substitute a fake and nothing holds a global
//! mutable client.

pub mod midtrans;
pub mod xendit;

pub use midtrans::{MidtransConfig, MidtransGateway};
pub use xendit::{XenditConfig, XenditGateway};

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

use ajar_shared::PaymentProvider;

use crate::error::{BillingError, BillingResult};

/// Outbound invoice/order creation request.
#[derive(Debug, Clone)]
pub struct InvoiceRequest {
    /// Our reference for the payment (the Midtrans order id or the Xendit
    /// external id).
    pub reference: String,
    pub amount: Decimal,
    pub description: String,
    pub user_id: Uuid,
}

/// What a provider hands back for a freshly created invoice/order.
#[derive(Debug, Clone)]
pub struct GatewayInvoice {
    /// The provider's own identifier for the payment. For Midtrans this is
    /// the order id we supplied; Xendit issues its own invoice id.
    pub external_id: String,
    pub invoice_url: Option<String>,
    pub expiry_date: Option<OffsetDateTime>,
}

/// A payment provider client.
///
/// `create_invoice` carries a bounded timeout; callers compensate on error
/// rather than retrying into an unknown provider state. `fetch_status` is a
/// read and may retry transient failures.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    async fn create_invoice(&self, request: &InvoiceRequest) -> BillingResult<GatewayInvoice>;

    async fn fetch_status(&self, external_id: &str) -> BillingResult<String>;
}

/// The configured gateway per provider.
#[derive(Clone)]
pub struct GatewayRegistry {
    midtrans: Arc<dyn PaymentGateway>,
    xendit: Arc<dyn PaymentGateway>,
}

impl GatewayRegistry {
    pub fn new(midtrans: Arc<dyn PaymentGateway>, xendit: Arc<dyn PaymentGateway>) -> Self {
        Self { midtrans, xendit }
    }

    /// Build both HTTP clients from environment variables.
    pub fn from_env() -> BillingResult<Self> {
        let midtrans = MidtransGateway::new(MidtransConfig::from_env()?);
        let xendit = XenditGateway::new(XenditConfig::from_env()?);
        Ok(Self::new(Arc::new(midtrans), Arc::new(xendit)))
    }

    pub fn for_provider(&self, provider: PaymentProvider) -> &Arc<dyn PaymentGateway> {
        match provider {
            PaymentProvider::Midtrans => &self.midtrans,
            PaymentProvider::Xendit => &self.xendit,
        }
    }
}

pub(crate) fn missing_env(name: &'static str) -> BillingError {
    BillingError::Gateway(format!("{name} is not set"))
}
