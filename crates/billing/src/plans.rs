//! Pricing plan catalog.
//!
//! Plans are managed out of band; this service only reads them.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// What a plan grants on purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(type_name = "bundle_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BundleType {
    /// Credits only.
    Credits,
    /// A subscription period only (possibly with bundled bonus credits).
    Subscription,
    /// Both credits and a subscription period.
    Hybrid,
}

impl BundleType {
    pub fn grants_subscription(&self) -> bool {
        matches!(self, BundleType::Subscription | BundleType::Hybrid)
    }
}

/// A purchasable plan.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PricingPlan {
    pub id: Uuid,
    pub name: String,
    pub bundle_type: BundleType,
    pub credits_granted: Decimal,
    pub price: Decimal,
    pub discount_percent: Decimal,
    pub duration_days: Option<i32>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl PricingPlan {
    /// Price after the plan's discount, rounded to 2 decimal places.
    pub fn final_amount(&self) -> Decimal {
        let hundred = Decimal::from(100);
        let factor = (hundred - self.discount_percent) / hundred;
        (self.price * factor).round_dp(2)
    }

    /// Human label for invoice descriptions.
    pub fn bundle_type_label(&self) -> &'static str {
        match self.bundle_type {
            BundleType::Credits => "credits",
            BundleType::Subscription => "subscription",
            BundleType::Hybrid => "credits + subscription",
        }
    }
}

/// Read-only plan lookup.
#[derive(Clone)]
pub struct PlanService {
    pool: PgPool,
}

impl PlanService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch a plan by id, or `PlanNotFound`.
    pub async fn get(&self, plan_id: Uuid) -> BillingResult<PricingPlan> {
        let plan: Option<PricingPlan> = sqlx::query_as(
            r#"
            SELECT id, name, bundle_type, credits_granted, price, discount_percent,
                   duration_days, is_active, created_at
            FROM pricing_plans
            WHERE id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;

        plan.ok_or(BillingError::PlanNotFound)
    }

    /// Fetch a plan that must be purchasable right now.
    pub async fn get_active(&self, plan_id: Uuid) -> BillingResult<PricingPlan> {
        let plan = self.get(plan_id).await?;
        if !plan.is_active {
            return Err(BillingError::PlanInactive);
        }
        Ok(plan)
    }

    /// All plans currently offered, cheapest first.
    pub async fn list_active(&self) -> BillingResult<Vec<PricingPlan>> {
        let plans: Vec<PricingPlan> = sqlx::query_as(
            r#"
            SELECT id, name, bundle_type, credits_granted, price, discount_percent,
                   duration_days, is_active, created_at
            FROM pricing_plans
            WHERE is_active = TRUE
            ORDER BY price ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(plans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn plan(price: Decimal, discount: Decimal) -> PricingPlan {
        PricingPlan {
            id: Uuid::new_v4(),
            name: "Paket Hemat".to_string(),
            bundle_type: BundleType::Credits,
            credits_granted: dec!(50),
            price,
            discount_percent: discount,
            duration_days: None,
            is_active: true,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn final_amount_without_discount_is_price() {
        assert_eq!(plan(dec!(100000), dec!(0)).final_amount(), dec!(100000));
    }

    #[test]
    fn final_amount_applies_discount() {
        assert_eq!(plan(dec!(100000), dec!(15)).final_amount(), dec!(85000));
        // Rounds to 2dp
        assert_eq!(plan(dec!(99999), dec!(33.33)).final_amount(), dec!(66669.33));
    }

    #[test]
    fn bundle_type_subscription_detection() {
        assert!(BundleType::Subscription.grants_subscription());
        assert!(BundleType::Hybrid.grants_subscription());
        assert!(!BundleType::Credits.grants_subscription());
    }
}
