//! Credit ledger
//!
//! The append-only record of every balance-affecting event, and the only
//! code path allowed to mutate `credit_balances`. Each mutation writes the
//! balance row and the ledger row in one transaction; the balance row is
//! locked with `SELECT ... FOR UPDATE` before `balance_before` is read, so
//! concurrent applications for the same user serialize instead of losing
//! updates.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use ajar_shared::PaymentMethod;

use crate::error::{BillingError, BillingResult};

/// Ledger entry type. Closed set, matched exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(type_name = "credit_entry_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Credits granted by a completed plan purchase.
    Purchase,
    /// Credits consumed by a metered feature (chat turn, diagram, exercise).
    Deduction,
    /// Operator-granted credits.
    Bonus,
    /// Credits bundled with a subscription-only plan.
    SubscriptionBonus,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Purchase => "purchase",
            EntryType::Deduction => "deduction",
            EntryType::Bonus => "bonus",
            EntryType::SubscriptionBonus => "subscription_bonus",
        }
    }

    /// Whether entries of this type remove credits.
    pub fn is_debit(&self) -> bool {
        matches!(self, EntryType::Deduction)
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settlement state of a ledger entry.
///
/// Deduction and bonus entries are created `Completed` (synchronous, trusted
/// callers). Purchase-type entries created by the legacy top-up flow start
/// `Pending` and transition exactly once when the provider confirms or the
/// payment lapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

/// A single ledger row. Immutable once `balance_after` is set.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance_id: Uuid,
    pub entry_type: EntryType,
    /// Signed: negative for deductions, positive otherwise.
    pub amount: Decimal,
    pub balance_before: Option<Decimal>,
    pub balance_after: Option<Decimal>,
    pub description: String,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub session_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Result of applying a mutation: the written entry and the balance it left
/// behind.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerApplication {
    pub entry: LedgerEntry,
    pub new_balance: Decimal,
}

/// Parameters for one ledger application.
#[derive(Debug, Clone)]
pub struct ApplyParams {
    pub user_id: Uuid,
    pub entry_type: EntryType,
    /// Magnitude; must be positive. The stored sign follows the entry type.
    pub amount: Decimal,
    pub description: String,
    pub session_id: Option<Uuid>,
    pub payment_method: Option<PaymentMethod>,
    pub payment_reference: Option<String>,
}

impl ApplyParams {
    pub fn new(user_id: Uuid, entry_type: EntryType, amount: Decimal) -> Self {
        Self {
            user_id,
            entry_type,
            amount,
            description: String::new(),
            session_id: None,
            payment_method: None,
            payment_reference: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn session(mut self, session_id: Option<Uuid>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn payment(mut self, method: PaymentMethod, reference: Option<String>) -> Self {
        self.payment_method = Some(method);
        self.payment_reference = reference;
        self
    }
}

/// Signed amount stored on the ledger row for a given entry type.
pub fn signed_amount(entry_type: EntryType, amount: Decimal) -> Decimal {
    if entry_type.is_debit() {
        -amount.abs()
    } else {
        amount.abs()
    }
}

/// Balance row, locked while a mutation is in flight.
#[derive(Debug, sqlx::FromRow)]
struct BalanceRow {
    id: Uuid,
    balance: Decimal,
}

/// The ledger mutator.
#[derive(Clone)]
pub struct LedgerService {
    pool: PgPool,
}

impl LedgerService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Current balance, creating the row at 0 on first access.
    pub async fn balance(&self, user_id: Uuid) -> BillingResult<Decimal> {
        sqlx::query("INSERT INTO credit_balances (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        let balance: Decimal =
            sqlx::query_scalar("SELECT balance FROM credit_balances WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(balance)
    }

    /// Apply one mutation in its own transaction.
    pub async fn apply(&self, params: ApplyParams) -> BillingResult<LedgerApplication> {
        let mut tx = self.pool.begin().await?;
        let applied = Self::apply_in_tx(&mut tx, params).await?;
        tx.commit().await?;
        Ok(applied)
    }

    /// Apply one mutation inside an enclosing transaction.
    ///
    /// Used by purchase completion so that the status flip, the credit grant,
    /// and the subscription activation commit (or roll back) together.
    pub async fn apply_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        params: ApplyParams,
    ) -> BillingResult<LedgerApplication> {
        if params.amount <= Decimal::ZERO {
            return Err(BillingError::InvalidAmount(format!(
                "amount must be positive, got {}",
                params.amount
            )));
        }

        let balance_row = Self::lock_or_create_balance(tx, params.user_id).await?;
        let balance_before = balance_row.balance;
        let amount = signed_amount(params.entry_type, params.amount);

        if params.entry_type.is_debit() && balance_before < params.amount {
            return Err(BillingError::InsufficientFunds {
                available: balance_before,
                requested: params.amount,
            });
        }

        let balance_after = balance_before + amount;

        sqlx::query("UPDATE credit_balances SET balance = $1, updated_at = NOW() WHERE id = $2")
            .bind(balance_after)
            .bind(balance_row.id)
            .execute(&mut **tx)
            .await?;

        let entry: LedgerEntry = sqlx::query_as(
            r#"
            INSERT INTO credit_transactions
                (user_id, balance_id, entry_type, amount, balance_before, balance_after,
                 description, payment_status, payment_method, payment_reference, session_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'completed', $8, $9, $10)
            RETURNING id, user_id, balance_id, entry_type, amount, balance_before,
                      balance_after, description, payment_status, payment_method,
                      payment_reference, session_id, created_at
            "#,
        )
        .bind(params.user_id)
        .bind(balance_row.id)
        .bind(params.entry_type)
        .bind(amount)
        .bind(balance_before)
        .bind(balance_after)
        .bind(&params.description)
        .bind(params.payment_method.map(|m| m.as_str()))
        .bind(&params.payment_reference)
        .bind(params.session_id)
        .fetch_one(&mut **tx)
        .await?;

        tracing::info!(
            user_id = %params.user_id,
            entry_type = %params.entry_type,
            amount = %amount,
            balance_after = %balance_after,
            "Ledger entry applied"
        );

        Ok(LedgerApplication {
            entry,
            new_balance: balance_after,
        })
    }

    /// Complete a pending legacy top-up entry.
    ///
    /// The entry's balance snapshot is taken now, at completion time, so the
    /// before/after chain stays consistent with the serialized balance
    /// history. Returns `AlreadyProcessed` if the entry is not pending.
    pub async fn complete_pending_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        entry_id: Uuid,
    ) -> BillingResult<LedgerApplication> {
        let pending: Option<LedgerEntry> = sqlx::query_as(
            r#"
            SELECT id, user_id, balance_id, entry_type, amount, balance_before,
                   balance_after, description, payment_status, payment_method,
                   payment_reference, session_id, created_at
            FROM credit_transactions
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(entry_id)
        .fetch_optional(&mut **tx)
        .await?;

        let pending = pending.ok_or(BillingError::PurchaseNotFound)?;
        if pending.payment_status != PaymentStatus::Pending {
            return Err(BillingError::AlreadyProcessed);
        }

        let balance_row = Self::lock_or_create_balance(tx, pending.user_id).await?;
        let balance_before = balance_row.balance;
        let balance_after = balance_before + pending.amount;

        sqlx::query("UPDATE credit_balances SET balance = $1, updated_at = NOW() WHERE id = $2")
            .bind(balance_after)
            .bind(balance_row.id)
            .execute(&mut **tx)
            .await?;

        let entry: LedgerEntry = sqlx::query_as(
            r#"
            UPDATE credit_transactions
            SET payment_status = 'completed', balance_before = $1, balance_after = $2
            WHERE id = $3
            RETURNING id, user_id, balance_id, entry_type, amount, balance_before,
                      balance_after, description, payment_status, payment_method,
                      payment_reference, session_id, created_at
            "#,
        )
        .bind(balance_before)
        .bind(balance_after)
        .bind(entry_id)
        .fetch_one(&mut **tx)
        .await?;

        tracing::info!(
            user_id = %entry.user_id,
            entry_id = %entry.id,
            amount = %entry.amount,
            balance_after = %balance_after,
            "Pending ledger entry completed"
        );

        Ok(LedgerApplication {
            entry,
            new_balance: balance_after,
        })
    }

    /// Fail a pending legacy top-up entry. No balance change.
    pub async fn fail_pending_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        entry_id: Uuid,
    ) -> BillingResult<()> {
        let updated = sqlx::query(
            "UPDATE credit_transactions SET payment_status = 'failed' WHERE id = $1 AND payment_status = 'pending'",
        )
        .bind(entry_id)
        .execute(&mut **tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(BillingError::AlreadyProcessed);
        }
        Ok(())
    }

    /// Ledger history for a user, newest first.
    pub async fn history(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> BillingResult<Vec<LedgerEntry>> {
        let entries: Vec<LedgerEntry> = sqlx::query_as(
            r#"
            SELECT id, user_id, balance_id, entry_type, amount, balance_before,
                   balance_after, description, payment_status, payment_method,
                   payment_reference, session_id, created_at
            FROM credit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit.clamp(1, 200))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Lock the user's balance row, creating it at 0 if absent.
    ///
    /// The insert and the locking select run inside the caller's transaction;
    /// after this returns, no concurrent mutation can read a stale balance.
    async fn lock_or_create_balance(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> BillingResult<BalanceRow> {
        sqlx::query("INSERT INTO credit_balances (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&mut **tx)
            .await?;

        let row: BalanceRow = sqlx::query_as(
            "SELECT id, balance FROM credit_balances WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn deduction_amounts_are_stored_negative() {
        assert_eq!(signed_amount(EntryType::Deduction, dec!(5)), dec!(-5));
        assert_eq!(signed_amount(EntryType::Deduction, dec!(-5)), dec!(-5));
    }

    #[test]
    fn credit_amounts_are_stored_positive() {
        assert_eq!(signed_amount(EntryType::Purchase, dec!(50)), dec!(50));
        assert_eq!(signed_amount(EntryType::Bonus, dec!(100)), dec!(100));
        assert_eq!(signed_amount(EntryType::SubscriptionBonus, dec!(25)), dec!(25));
    }

    #[test]
    fn only_deduction_is_a_debit() {
        assert!(EntryType::Deduction.is_debit());
        assert!(!EntryType::Purchase.is_debit());
        assert!(!EntryType::Bonus.is_debit());
        assert!(!EntryType::SubscriptionBonus.is_debit());
    }
}
