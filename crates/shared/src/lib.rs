#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Shared plumbing for the ajar workspace.
//!
//! Database pool construction, the migrations runner, and the handful of
//! enums that cross crate boundaries (payment providers and methods).

mod db;
mod types;

pub use db::{create_migration_pool, create_pool, run_migrations};
pub use types::{PaymentMethod, PaymentProvider};
