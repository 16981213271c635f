//! Midtrans Snap client.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

use ajar_shared::PaymentProvider;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{missing_env, GatewayInvoice, InvoiceRequest, PaymentGateway};

/// Midtrans credentials and endpoints.
#[derive(Debug, Clone)]
pub struct MidtransConfig {
    pub server_key: String,
    /// Snap API base, e.g. `https://app.sandbox.midtrans.com`.
    pub snap_base_url: String,
    /// Core API base (status lookups), e.g. `https://api.sandbox.midtrans.com`.
    pub api_base_url: String,
}

impl MidtransConfig {
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            server_key: std::env::var("MIDTRANS_SERVER_KEY")
                .map_err(|_| missing_env("MIDTRANS_SERVER_KEY"))?,
            snap_base_url: std::env::var("MIDTRANS_SNAP_BASE_URL")
                .unwrap_or_else(|_| "https://app.sandbox.midtrans.com".to_string()),
            api_base_url: std::env::var("MIDTRANS_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.sandbox.midtrans.com".to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SnapTransactionResponse {
    #[allow(dead_code)]
    token: String,
    redirect_url: String,
}

#[derive(Debug, Deserialize)]
struct TransactionStatusResponse {
    transaction_status: Option<String>,
    status_message: Option<String>,
}

/// Midtrans Snap gateway.
pub struct MidtransGateway {
    config: MidtransConfig,
    http: reqwest::Client,
}

impl MidtransGateway {
    pub fn new(config: MidtransConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, http }
    }

    fn basic_auth(&self) -> String {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{}:", self.config.server_key));
        format!("Basic {encoded}")
    }
}

#[async_trait]
impl PaymentGateway for MidtransGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Midtrans
    }

    async fn create_invoice(&self, request: &InvoiceRequest) -> BillingResult<GatewayInvoice> {
        let url = format!("{}/snap/v1/transactions", self.config.snap_base_url);

        // Midtrans rejects fractional IDR amounts.
        let gross_amount = request.amount.round_dp(0);

        let body = serde_json::json!({
            "transaction_details": {
                "order_id": request.reference,
                "gross_amount": gross_amount,
            },
            "item_details": [{
                "id": request.reference,
                "price": gross_amount,
                "quantity": 1,
                "name": request.description,
            }],
            "custom_field1": request.user_id.to_string(),
        });

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, self.basic_auth())
            .json(&body)
            .send()
            .await
            .map_err(|e| BillingError::Gateway(format!("midtrans snap request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BillingError::Gateway(format!(
                "midtrans snap returned {status}: {text}"
            )));
        }

        let snap: SnapTransactionResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("midtrans snap response invalid: {e}")))?;

        Ok(GatewayInvoice {
            external_id: request.reference.clone(),
            invoice_url: Some(snap.redirect_url),
            expiry_date: None,
        })
    }

    async fn fetch_status(&self, external_id: &str) -> BillingResult<String> {
        let url = format!("{}/v2/{}/status", self.config.api_base_url, external_id);
        let auth = self.basic_auth();
        let http = self.http.clone();

        let strategy = FixedInterval::from_millis(500).take(2);
        let status: TransactionStatusResponse = Retry::spawn(strategy, || {
            let http = http.clone();
            let url = url.clone();
            let auth = auth.clone();
            async move {
                http.get(&url)
                    .header(reqwest::header::AUTHORIZATION, auth)
                    .send()
                    .await
                    .map_err(|e| BillingError::Gateway(format!("midtrans status request failed: {e}")))?
                    .json::<TransactionStatusResponse>()
                    .await
                    .map_err(|e| BillingError::Gateway(format!("midtrans status response invalid: {e}")))
            }
        })
        .await?;

        status.transaction_status.ok_or_else(|| {
            BillingError::Gateway(format!(
                "midtrans status lookup failed: {}",
                status.status_message.unwrap_or_default()
            ))
        })
    }
}

/// Build a Midtrans order id for a purchase.
pub fn order_id(purchase_id: uuid::Uuid, unix_ts: i64) -> String {
    format!("PURCHASE-{purchase_id}-{unix_ts}")
}

/// Parse a purchase id back out of an order id in the `PURCHASE-{id}-{ts}`
/// format. Returns `None` for legacy references.
pub fn parse_order_id(order_id: &str) -> Option<uuid::Uuid> {
    let rest = order_id.strip_prefix("PURCHASE-")?;
    let (id, _ts) = rest.rsplit_once('-')?;
    id.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn order_id_round_trips() {
        let id = Uuid::new_v4();
        let reference = order_id(id, 1_700_000_000);
        assert_eq!(parse_order_id(&reference), Some(id));
    }

    #[test]
    fn legacy_references_do_not_parse() {
        assert_eq!(parse_order_id("TOPUP-abc123-1700000000"), None);
        assert_eq!(parse_order_id("PURCHASE-not-a-uuid"), None);
        assert_eq!(parse_order_id(""), None);
    }

    fn gateway_for(server: &mockito::Server) -> MidtransGateway {
        MidtransGateway::new(MidtransConfig {
            server_key: "sk-test".to_string(),
            snap_base_url: server.url(),
            api_base_url: server.url(),
        })
    }

    #[tokio::test]
    async fn create_invoice_parses_snap_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/snap/v1/transactions")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token":"tok-1","redirect_url":"https://snap.example/pay/tok-1"}"#)
            .create_async()
            .await;

        let invoice = gateway_for(&server)
            .create_invoice(&InvoiceRequest {
                reference: "PURCHASE-x-1".to_string(),
                amount: dec!(100000),
                description: "Paket Hemat (credits)".to_string(),
                user_id: Uuid::new_v4(),
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(invoice.external_id, "PURCHASE-x-1");
        assert_eq!(
            invoice.invoice_url.as_deref(),
            Some("https://snap.example/pay/tok-1")
        );
    }

    #[tokio::test]
    async fn create_invoice_surfaces_provider_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/snap/v1/transactions")
            .with_status(401)
            .with_body(r#"{"error_messages":["unauthorized"]}"#)
            .create_async()
            .await;

        let err = gateway_for(&server)
            .create_invoice(&InvoiceRequest {
                reference: "PURCHASE-x-2".to_string(),
                amount: dec!(100000),
                description: "test".to_string(),
                user_id: Uuid::new_v4(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Gateway(_)));
    }

    #[tokio::test]
    async fn fetch_status_returns_transaction_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/PURCHASE-x-3/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"transaction_status":"settlement","status_code":"200"}"#)
            .create_async()
            .await;

        let status = gateway_for(&server)
            .fetch_status("PURCHASE-x-3")
            .await
            .unwrap();
        assert_eq!(status, "settlement");
    }
}
