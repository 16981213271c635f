//! Error types for the API server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use ajar_billing::BillingError;

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Insufficient funds")]
    InsufficientFunds { details: serde_json::Value },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upstream provider error")]
    UpstreamProvider(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error")]
    Database(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InsufficientFunds { .. } | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::UpstreamProvider(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "ALREADY_PROCESSED",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::UpstreamProvider(_) => "UPSTREAM_PROVIDER_ERROR",
            Self::Internal(_) | Self::Database(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        // Log internal errors
        if matches!(self, Self::Internal(_) | Self::Database(_)) {
            tracing::error!(error = ?self, "Internal API error");
        }

        let details = match &self {
            Self::InsufficientFunds { details } => Some(details.clone()),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::InsufficientFunds {
                available,
                requested,
            } => ApiError::InsufficientFunds {
                details: serde_json::json!({
                    "available": available,
                    "requested": requested,
                }),
            },
            BillingError::WebhookSignatureInvalid => ApiError::Unauthorized,
            BillingError::PurchaseNotFound => ApiError::NotFound("purchase".to_string()),
            BillingError::PlanNotFound => ApiError::NotFound("pricing plan".to_string()),
            BillingError::PlanInactive => {
                ApiError::BadRequest("pricing plan is not active".to_string())
            }
            BillingError::AlreadyProcessed => {
                ApiError::Conflict("purchase already processed".to_string())
            }
            BillingError::InvalidAmount(msg) => ApiError::BadRequest(msg),
            BillingError::Gateway(msg) => ApiError::UpstreamProvider(msg),
            BillingError::Database(msg) => ApiError::Database(msg),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Database(e.to_string())
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn insufficient_funds_maps_to_400() {
        let err: ApiError = BillingError::InsufficientFunds {
            available: dec!(3),
            requested: dec!(5),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "INSUFFICIENT_FUNDS");
    }

    #[test]
    fn signature_failure_maps_to_401() {
        let err: ApiError = BillingError::WebhookSignatureInvalid.into();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn already_processed_maps_to_conflict() {
        let err: ApiError = BillingError::AlreadyProcessed.into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.error_code(), "ALREADY_PROCESSED");
    }

    #[test]
    fn gateway_error_maps_to_bad_gateway() {
        let err: ApiError = BillingError::Gateway("timeout".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn not_found_maps_to_404() {
        let err: ApiError = BillingError::PurchaseNotFound.into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }
}
