//! Xendit Invoice API client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

use ajar_shared::PaymentProvider;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{missing_env, GatewayInvoice, InvoiceRequest, PaymentGateway};

/// Xendit credentials and endpoint.
#[derive(Debug, Clone)]
pub struct XenditConfig {
    pub secret_key: String,
    /// API base, e.g. `https://api.xendit.co`.
    pub base_url: String,
    /// Seconds until a created invoice expires.
    pub invoice_duration_secs: u32,
}

impl XenditConfig {
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: std::env::var("XENDIT_SECRET_KEY")
                .map_err(|_| missing_env("XENDIT_SECRET_KEY"))?,
            base_url: std::env::var("XENDIT_BASE_URL")
                .unwrap_or_else(|_| "https://api.xendit.co".to_string()),
            invoice_duration_secs: std::env::var("XENDIT_INVOICE_DURATION_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(86_400),
        })
    }
}

#[derive(Debug, Deserialize)]
struct InvoiceResponse {
    id: String,
    invoice_url: Option<String>,
    expiry_date: Option<String>,
    status: Option<String>,
}

/// Xendit invoice gateway.
pub struct XenditGateway {
    config: XenditConfig,
    http: reqwest::Client,
}

impl XenditGateway {
    pub fn new(config: XenditConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, http }
    }
}

#[async_trait]
impl PaymentGateway for XenditGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Xendit
    }

    async fn create_invoice(&self, request: &InvoiceRequest) -> BillingResult<GatewayInvoice> {
        let url = format!("{}/v2/invoices", self.config.base_url);

        let body = serde_json::json!({
            "external_id": request.reference,
            "amount": request.amount,
            "description": request.description,
            "invoice_duration": self.config.invoice_duration_secs,
            "metadata": { "user_id": request.user_id.to_string() },
        });

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.config.secret_key, Some(""))
            .json(&body)
            .send()
            .await
            .map_err(|e| BillingError::Gateway(format!("xendit invoice request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BillingError::Gateway(format!(
                "xendit invoice returned {status}: {text}"
            )));
        }

        let invoice: InvoiceResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("xendit invoice response invalid: {e}")))?;

        let expiry_date = invoice
            .expiry_date
            .as_deref()
            .and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok());

        Ok(GatewayInvoice {
            external_id: invoice.id,
            invoice_url: invoice.invoice_url,
            expiry_date,
        })
    }

    async fn fetch_status(&self, external_id: &str) -> BillingResult<String> {
        let url = format!("{}/v2/invoices/{external_id}", self.config.base_url);
        let http = self.http.clone();
        let secret_key = self.config.secret_key.clone();

        let strategy = FixedInterval::from_millis(500).take(2);
        let invoice: InvoiceResponse = Retry::spawn(strategy, || {
            let http = http.clone();
            let url = url.clone();
            let secret_key = secret_key.clone();
            async move {
                http.get(&url)
                    .basic_auth(&secret_key, Some(""))
                    .send()
                    .await
                    .map_err(|e| BillingError::Gateway(format!("xendit status request failed: {e}")))?
                    .json::<InvoiceResponse>()
                    .await
                    .map_err(|e| BillingError::Gateway(format!("xendit status response invalid: {e}")))
            }
        })
        .await?;

        invoice
            .status
            .ok_or_else(|| BillingError::Gateway("xendit invoice has no status".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn gateway_for(server: &mockito::Server) -> XenditGateway {
        XenditGateway::new(XenditConfig {
            secret_key: "xnd-test".to_string(),
            base_url: server.url(),
            invoice_duration_secs: 86_400,
        })
    }

    #[tokio::test]
    async fn create_invoice_parses_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/invoices")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "id": "inv-abc",
                    "external_id": "PURCHASE-x-1",
                    "invoice_url": "https://checkout.example/inv-abc",
                    "expiry_date": "2026-08-08T10:00:00.000Z",
                    "status": "PENDING"
                }"#,
            )
            .create_async()
            .await;

        let invoice = gateway_for(&server)
            .create_invoice(&InvoiceRequest {
                reference: "PURCHASE-x-1".to_string(),
                amount: dec!(50000),
                description: "Paket Premium".to_string(),
                user_id: Uuid::new_v4(),
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(invoice.external_id, "inv-abc");
        assert_eq!(
            invoice.invoice_url.as_deref(),
            Some("https://checkout.example/inv-abc")
        );
        assert!(invoice.expiry_date.is_some());
    }

    #[tokio::test]
    async fn create_invoice_surfaces_provider_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v2/invoices")
            .with_status(400)
            .with_body(r#"{"error_code":"INVALID_API_KEY"}"#)
            .create_async()
            .await;

        let err = gateway_for(&server)
            .create_invoice(&InvoiceRequest {
                reference: "PURCHASE-x-2".to_string(),
                amount: dec!(50000),
                description: "test".to_string(),
                user_id: Uuid::new_v4(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Gateway(_)));
    }

    #[tokio::test]
    async fn unparsable_expiry_is_tolerated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v2/invoices")
            .with_status(200)
            .with_body(r#"{"id":"inv-x","invoice_url":null,"expiry_date":"not-a-date"}"#)
            .create_async()
            .await;

        let invoice = gateway_for(&server)
            .create_invoice(&InvoiceRequest {
                reference: "PURCHASE-x-3".to_string(),
                amount: dec!(50000),
                description: "test".to_string(),
                user_id: Uuid::new_v4(),
            })
            .await
            .unwrap();

        assert_eq!(invoice.expiry_date, None);
    }

    #[tokio::test]
    async fn fetch_status_returns_invoice_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/invoices/inv-abc")
            .with_status(200)
            .with_body(r#"{"id":"inv-abc","status":"PAID"}"#)
            .create_async()
            .await;

        let status = gateway_for(&server).fetch_status("inv-abc").await.unwrap();
        assert_eq!(status, "PAID");
    }
}
