// API crate clippy configuration
#![allow(clippy::single_match)] // Clearer in some cases
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Ajar API Library
//!
//! This crate contains the HTTP server components for the ajar credit and
//! payment platform: credit endpoints, checkout, admin approval, and the
//! payment-provider webhook endpoints.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
