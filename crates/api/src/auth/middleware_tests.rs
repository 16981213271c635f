//! Middleware tests: bearer extraction, role enforcement, extension wiring.

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, Request, StatusCode},
    middleware,
    routing::get,
    Extension, Router,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use tower::ServiceExt;
use uuid::Uuid;

use super::jwt::{Claims, JwtManager};
use super::middleware::{require_admin, require_auth, AuthState, AuthUser};

const SECRET: &str = "test-secret";

fn token(sub: &str, role: &str, exp_offset: i64) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        role: role.to_string(),
        exp: time::OffsetDateTime::now_utc().unix_timestamp() + exp_offset,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn whoami(Extension(user): Extension<AuthUser>) -> String {
    format!("{}:{}", user.user_id, user.role)
}

fn user_app() -> Router {
    let auth_state = AuthState {
        jwt_manager: JwtManager::new(SECRET),
    };
    Router::new()
        .route("/me", get(whoami))
        .layer(middleware::from_fn_with_state(auth_state, require_auth))
}

fn admin_app() -> Router {
    let auth_state = AuthState {
        jwt_manager: JwtManager::new(SECRET),
    };
    Router::new()
        .route("/admin", get(whoami))
        .layer(middleware::from_fn_with_state(auth_state, require_admin))
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let response = user_app()
        .oneshot(Request::builder().uri("/me").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn valid_token_passes_and_sets_extension() {
    let user_id = Uuid::new_v4();
    let response = user_app()
        .oneshot(
            Request::builder()
                .uri("/me")
                .header(
                    AUTHORIZATION,
                    format!("Bearer {}", token(&user_id.to_string(), "user", 3600)),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(body, format!("{user_id}:user").as_bytes());
}

#[tokio::test]
async fn expired_token_is_unauthorized() {
    let response = user_app()
        .oneshot(
            Request::builder()
                .uri("/me")
                .header(
                    AUTHORIZATION,
                    format!(
                        "Bearer {}",
                        token(&Uuid::new_v4().to_string(), "user", -3600)
                    ),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_subject_is_unauthorized() {
    let response = user_app()
        .oneshot(
            Request::builder()
                .uri("/me")
                .header(
                    AUTHORIZATION,
                    format!("Bearer {}", token("not-a-uuid", "user", 3600)),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn non_admin_is_forbidden_on_admin_routes() {
    let response = admin_app()
        .oneshot(
            Request::builder()
                .uri("/admin")
                .header(
                    AUTHORIZATION,
                    format!(
                        "Bearer {}",
                        token(&Uuid::new_v4().to_string(), "user", 3600)
                    ),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_passes_admin_routes() {
    let response = admin_app()
        .oneshot(
            Request::builder()
                .uri("/admin")
                .header(
                    AUTHORIZATION,
                    format!(
                        "Bearer {}",
                        token(&Uuid::new_v4().to_string(), "admin", 3600)
                    ),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
