//! Subscription windows.
//!
//! A window is created `not_active` as a placeholder when a
//! subscription-bearing purchase is initiated, flipped to `active` on payment
//! completion, and to `expired` on payment failure or natural expiry. The
//! activation path reuses the placeholder before ever creating a fresh
//! window, so racing confirmation flows cannot leave two active windows
//! behind.

use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::BillingResult;

/// Lifecycle state of a subscription window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    NotActive,
    Active,
    Expired,
}

/// A subscription period for one user.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SubscriptionWindow {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(with = "time::serde::rfc3339::option")]
    pub start_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Start date for a new window: a renewal chains off the end of an existing
/// future-dated active window instead of overlapping it.
pub fn chain_start(active_until: Option<OffsetDateTime>, now: OffsetDateTime) -> OffsetDateTime {
    match active_until {
        Some(end) if end > now => end,
        _ => now,
    }
}

/// End date for a window of the given plan duration.
pub fn window_end(start: OffsetDateTime, duration_days: i32) -> OffsetDateTime {
    start + Duration::days(i64::from(duration_days))
}

/// Subscription window store.
#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
}

impl SubscriptionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a `not_active` placeholder for a purchase being initiated.
    pub async fn create_placeholder_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> BillingResult<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO subscription_windows (user_id, status) VALUES ($1, 'not_active') RETURNING id",
        )
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(id)
    }

    /// Activate a window as part of purchase completion.
    ///
    /// Prefers the purchase's `not_active` placeholder; creates a fresh row
    /// only when no placeholder survives (it may already have been expired by
    /// a concurrent failure path). The start date chains off an existing
    /// future-dated active window's end when one exists.
    pub async fn activate_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        placeholder_id: Option<Uuid>,
        duration_days: i32,
    ) -> BillingResult<SubscriptionWindow> {
        let now = OffsetDateTime::now_utc();

        let active_until: Option<OffsetDateTime> = sqlx::query_scalar(
            r#"
            SELECT end_date FROM subscription_windows
            WHERE user_id = $1 AND status = 'active' AND end_date > $2
            ORDER BY end_date DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_optional(&mut **tx)
        .await?;

        let start = chain_start(active_until, now);
        let end = window_end(start, duration_days);

        if let Some(placeholder) = placeholder_id {
            let updated: Option<SubscriptionWindow> = sqlx::query_as(
                r#"
                UPDATE subscription_windows
                SET status = 'active', start_date = $1, end_date = $2, updated_at = NOW()
                WHERE id = $3 AND status = 'not_active'
                RETURNING id, user_id, start_date, end_date, status, created_at
                "#,
            )
            .bind(start)
            .bind(end)
            .bind(placeholder)
            .fetch_optional(&mut **tx)
            .await?;

            if let Some(window) = updated {
                tracing::info!(
                    user_id = %user_id,
                    window_id = %window.id,
                    end_date = %end,
                    "Subscription placeholder activated"
                );
                return Ok(window);
            }
        }

        let window: SubscriptionWindow = sqlx::query_as(
            r#"
            INSERT INTO subscription_windows (user_id, start_date, end_date, status)
            VALUES ($1, $2, $3, 'active')
            RETURNING id, user_id, start_date, end_date, status, created_at
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_one(&mut **tx)
        .await?;

        tracing::info!(
            user_id = %user_id,
            window_id = %window.id,
            end_date = %end,
            "Subscription window activated"
        );

        Ok(window)
    }

    /// Expire a purchase's placeholder after a failed payment. No-op when the
    /// window already left `not_active`.
    pub async fn expire_placeholder_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        window_id: Uuid,
    ) -> BillingResult<()> {
        sqlx::query(
            "UPDATE subscription_windows SET status = 'expired', updated_at = NOW() WHERE id = $1 AND status = 'not_active'",
        )
        .bind(window_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// The user's active window with the latest future end date, if any.
    pub async fn current_active(&self, user_id: Uuid) -> BillingResult<Option<SubscriptionWindow>> {
        let window: Option<SubscriptionWindow> = sqlx::query_as(
            r#"
            SELECT id, user_id, start_date, end_date, status, created_at
            FROM subscription_windows
            WHERE user_id = $1 AND status = 'active' AND end_date > NOW()
            ORDER BY end_date DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(window)
    }

    /// Flip naturally lapsed windows to `expired`. Run periodically by the
    /// worker; returns the number of windows expired.
    pub async fn expire_due_windows(&self) -> BillingResult<u64> {
        let result = sqlx::query(
            "UPDATE subscription_windows SET status = 'expired', updated_at = NOW() WHERE status = 'active' AND end_date <= NOW()",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(unix: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(unix).unwrap()
    }

    #[test]
    fn fresh_subscription_starts_now() {
        let now = at(1_700_000_000);
        assert_eq!(chain_start(None, now), now);
    }

    #[test]
    fn renewal_chains_off_future_active_end() {
        let now = at(1_700_000_000);
        let active_end = now + Duration::days(10);
        assert_eq!(chain_start(Some(active_end), now), active_end);
    }

    #[test]
    fn lapsed_window_does_not_chain() {
        let now = at(1_700_000_000);
        let stale_end = now - Duration::days(1);
        assert_eq!(chain_start(Some(stale_end), now), now);
    }

    #[test]
    fn window_end_adds_plan_duration() {
        let start = at(1_700_000_000);
        assert_eq!(window_end(start, 30), start + Duration::days(30));
    }
}
