//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use super::jwt::JwtManager;

/// Authenticated user information extracted from the bearer JWT.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// State needed for authentication
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": { "code": "UNAUTHORIZED", "message": message }
        })),
    )
        .into_response()
}

fn forbidden(message: &str) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "error": { "code": "FORBIDDEN", "message": message }
        })),
    )
        .into_response()
}

/// Extract and verify the bearer token, stashing an [`AuthUser`] extension
/// for downstream handlers.
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(&req) {
        Some(token) => token,
        None => return unauthorized("Missing bearer token"),
    };

    let claims = match auth_state.jwt_manager.verify(&token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!(error = %e, "JWT verification failed");
            return unauthorized("Invalid or expired token");
        }
    };

    let user_id = match claims.sub.parse::<Uuid>() {
        Ok(id) => id,
        Err(_) => return unauthorized("Malformed subject claim"),
    };

    req.extensions_mut().insert(AuthUser {
        user_id,
        role: claims.role,
    });

    next.run(req).await
}

/// Like [`require_auth`], but additionally requires the admin role.
pub async fn require_admin(
    State(auth_state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(&req) {
        Some(token) => token,
        None => return unauthorized("Missing bearer token"),
    };

    let claims = match auth_state.jwt_manager.verify(&token) {
        Ok(claims) => claims,
        Err(_) => return unauthorized("Invalid or expired token"),
    };

    if claims.role != "admin" {
        return forbidden("Admin role required");
    }

    let user_id = match claims.sub.parse::<Uuid>() {
        Ok(id) => id,
        Err(_) => return unauthorized("Malformed subject claim"),
    };

    req.extensions_mut().insert(AuthUser {
        user_id,
        role: claims.role,
    });

    next.run(req).await
}

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}
