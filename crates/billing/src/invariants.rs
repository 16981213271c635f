//! Ledger Invariants Module
//!
//! Provides runnable consistency checks for the credit ledger and purchase
//! pipeline. These invariants can be run after any mutation or webhook
//! replay to ensure the system is in a valid state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write
//! 4. **Complete**: Covers all critical ledger consistency requirements

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// User(s) affected
    pub user_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - balances may be wrong or grants duplicated
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

/// Row type for balance drift violation
#[derive(Debug, sqlx::FromRow)]
struct BalanceDriftRow {
    user_id: Uuid,
    balance: Decimal,
    ledger_sum: Decimal,
}

/// Row type for broken before/after chain violation
#[derive(Debug, sqlx::FromRow)]
struct BrokenChainRow {
    entry_id: Uuid,
    user_id: Uuid,
    amount: Decimal,
    balance_before: Option<Decimal>,
    balance_after: Option<Decimal>,
}

/// Row type for multiple active windows violation
#[derive(Debug, sqlx::FromRow)]
struct MultipleWindowsRow {
    user_id: Uuid,
    window_count: i64,
}

/// Row type for missing grant violation
#[derive(Debug, sqlx::FromRow)]
struct GrantMismatchRow {
    purchase_id: Uuid,
    user_id: Uuid,
    credits_granted: Decimal,
    grant_count: i64,
}

/// Row type for placeholder hygiene violation
#[derive(Debug, sqlx::FromRow)]
struct StalePlaceholderRow {
    purchase_id: Uuid,
    user_id: Uuid,
    purchase_status: String,
}

/// Row type for pending non-purchase entry violation
#[derive(Debug, sqlx::FromRow)]
struct PendingNonPurchaseRow {
    entry_id: Uuid,
    user_id: Uuid,
    entry_type: String,
}

/// Service for running ledger invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        // Run all checks
        violations.extend(self.check_balance_matches_ledger().await?);
        violations.extend(self.check_ledger_chain().await?);
        violations.extend(self.check_single_active_window().await?);
        violations.extend(self.check_completed_purchase_granted_once().await?);
        violations.extend(self.check_terminal_purchase_placeholders().await?);
        violations.extend(self.check_pending_entries_are_purchases().await?);

        let checks_run = 6;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: Balance equals the sum of completed ledger amounts
    ///
    /// The stored balance is a cache of the ledger; any drift means a lost
    /// update or a mutation that bypassed the ledger mutator.
    async fn check_balance_matches_ledger(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<BalanceDriftRow> = sqlx::query_as(
            r#"
            SELECT
                b.user_id,
                b.balance,
                COALESCE(SUM(t.amount) FILTER (WHERE t.payment_status = 'completed'), 0) as ledger_sum
            FROM credit_balances b
            LEFT JOIN credit_transactions t ON t.balance_id = b.id
            GROUP BY b.user_id, b.balance
            HAVING b.balance != COALESCE(SUM(t.amount) FILTER (WHERE t.payment_status = 'completed'), 0)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "balance_matches_ledger".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Balance {} does not equal completed ledger sum {}",
                    row.balance, row.ledger_sum
                ),
                context: serde_json::json!({
                    "balance": row.balance,
                    "ledger_sum": row.ledger_sum,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: Completed entries satisfy after = before + amount
    async fn check_ledger_chain(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<BrokenChainRow> = sqlx::query_as(
            r#"
            SELECT
                t.id as entry_id,
                t.user_id,
                t.amount,
                t.balance_before,
                t.balance_after
            FROM credit_transactions t
            WHERE t.payment_status = 'completed'
              AND (t.balance_before IS NULL
                   OR t.balance_after IS NULL
                   OR t.balance_after != t.balance_before + t.amount)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "ledger_chain_consistent".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Completed entry {} breaks the before/after chain",
                    row.entry_id
                ),
                context: serde_json::json!({
                    "entry_id": row.entry_id,
                    "amount": row.amount,
                    "balance_before": row.balance_before,
                    "balance_after": row.balance_after,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: At most 1 future-dated active window per user
    ///
    /// Two active windows would double-count entitlement and confuse the
    /// renewal chaining logic.
    async fn check_single_active_window(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleWindowsRow> = sqlx::query_as(
            r#"
            SELECT user_id, COUNT(*) as window_count
            FROM subscription_windows
            WHERE status = 'active' AND end_date > NOW()
            GROUP BY user_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_active_window".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "User has {} active subscription windows (expected at most 1)",
                    row.window_count
                ),
                context: serde_json::json!({
                    "window_count": row.window_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 4: A completed credit-bearing purchase granted exactly once
    ///
    /// The grant entry is written in the same transaction as the status
    /// flip, so zero or duplicate grants mean the state machine was bypassed.
    async fn check_completed_purchase_granted_once(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<GrantMismatchRow> = sqlx::query_as(
            r#"
            SELECT
                p.id as purchase_id,
                p.user_id,
                p.credits_granted,
                COUNT(t.id) as grant_count
            FROM purchases p
            LEFT JOIN credit_transactions t
                ON t.description = 'Credits from purchase ' || p.id
               AND t.payment_status = 'completed'
            WHERE p.payment_status = 'completed'
              AND p.credits_granted > 0
            GROUP BY p.id, p.user_id, p.credits_granted
            HAVING COUNT(t.id) != 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "completed_purchase_granted_once".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Completed purchase {} has {} grant entries (expected 1)",
                    row.purchase_id, row.grant_count
                ),
                context: serde_json::json!({
                    "purchase_id": row.purchase_id,
                    "credits_granted": row.credits_granted,
                    "grant_count": row.grant_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 5: Terminal purchases leave no not_active placeholder
    async fn check_terminal_purchase_placeholders(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<StalePlaceholderRow> = sqlx::query_as(
            r#"
            SELECT
                p.id as purchase_id,
                p.user_id,
                p.payment_status::TEXT as purchase_status
            FROM purchases p
            JOIN subscription_windows w ON w.id = p.subscription_window_id
            WHERE p.payment_status IN ('completed', 'failed')
              AND w.status = 'not_active'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "terminal_purchase_placeholders".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Purchase {} is {} but its subscription window is still not_active",
                    row.purchase_id, row.purchase_status
                ),
                context: serde_json::json!({
                    "purchase_id": row.purchase_id,
                    "purchase_status": row.purchase_status,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 6: Pending ledger entries are purchase-type only
    ///
    /// Deductions and bonuses are synchronous and must never wait on
    /// external confirmation.
    async fn check_pending_entries_are_purchases(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PendingNonPurchaseRow> = sqlx::query_as(
            r#"
            SELECT
                t.id as entry_id,
                t.user_id,
                t.entry_type::TEXT as entry_type
            FROM credit_transactions t
            WHERE t.payment_status = 'pending'
              AND t.entry_type != 'purchase'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "pending_entries_are_purchases".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Pending ledger entry {} has type '{}' (only purchase entries may be pending)",
                    row.entry_id, row.entry_type
                ),
                context: serde_json::json!({
                    "entry_id": row.entry_id,
                    "entry_type": row.entry_type,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "balance_matches_ledger" => self.check_balance_matches_ledger().await,
            "ledger_chain_consistent" => self.check_ledger_chain().await,
            "single_active_window" => self.check_single_active_window().await,
            "completed_purchase_granted_once" => {
                self.check_completed_purchase_granted_once().await
            }
            "terminal_purchase_placeholders" => self.check_terminal_purchase_placeholders().await,
            "pending_entries_are_purchases" => self.check_pending_entries_are_purchases().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "balance_matches_ledger",
            "ledger_chain_consistent",
            "single_active_window",
            "completed_purchase_granted_once",
            "terminal_purchase_placeholders",
            "pending_entries_are_purchases",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 6);
        assert!(checks.contains(&"balance_matches_ledger"));
        assert!(checks.contains(&"single_active_window"));
    }
}
