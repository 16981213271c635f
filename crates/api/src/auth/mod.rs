//! Authentication for the ajar API.
//!
//! Token issuance belongs to the external auth service; this module only
//! verifies the JWTs it mints and extracts the caller's identity and role.

pub mod jwt;
pub mod middleware;

#[cfg(test)]
mod middleware_tests;

pub use jwt::{Claims, JwtManager};
pub use middleware::{require_admin, require_auth, AuthState, AuthUser};
