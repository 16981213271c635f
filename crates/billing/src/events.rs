//! Billing event audit log.
//!
//! Append-only trail of billing actions. Logging failures are reported to
//! the caller, who logs and continues; an audit miss must never roll back
//! the transition it describes.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;

/// Who performed a billing action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    Admin,
    Midtrans,
    Xendit,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::Admin => "admin",
            ActorType::Midtrans => "midtrans",
            ActorType::Xendit => "xendit",
            ActorType::System => "system",
        }
    }
}

/// Billing event kinds recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEventType {
    PurchaseCreated,
    PurchaseCompleted,
    PurchaseFailed,
    EvidenceSubmitted,
    CreditsDeducted,
    BonusGranted,
    SubscriptionActivated,
    SubscriptionExpired,
    LegacyTopupCompleted,
    LegacyTopupFailed,
}

impl BillingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingEventType::PurchaseCreated => "purchase_created",
            BillingEventType::PurchaseCompleted => "purchase_completed",
            BillingEventType::PurchaseFailed => "purchase_failed",
            BillingEventType::EvidenceSubmitted => "evidence_submitted",
            BillingEventType::CreditsDeducted => "credits_deducted",
            BillingEventType::BonusGranted => "bonus_granted",
            BillingEventType::SubscriptionActivated => "subscription_activated",
            BillingEventType::SubscriptionExpired => "subscription_expired",
            BillingEventType::LegacyTopupCompleted => "legacy_topup_completed",
            BillingEventType::LegacyTopupFailed => "legacy_topup_failed",
        }
    }
}

/// Builder for one audit row.
#[derive(Debug, Clone)]
pub struct BillingEventBuilder {
    user_id: Uuid,
    event_type: BillingEventType,
    actor_type: ActorType,
    data: serde_json::Value,
    purchase_id: Option<Uuid>,
    payment_reference: Option<String>,
}

impl BillingEventBuilder {
    pub fn new(user_id: Uuid, event_type: BillingEventType) -> Self {
        Self {
            user_id,
            event_type,
            actor_type: ActorType::System,
            data: serde_json::Value::Null,
            purchase_id: None,
            payment_reference: None,
        }
    }

    pub fn actor_type(mut self, actor: ActorType) -> Self {
        self.actor_type = actor;
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn purchase(mut self, purchase_id: Uuid) -> Self {
        self.purchase_id = Some(purchase_id);
        self
    }

    pub fn payment_reference(mut self, reference: impl Into<String>) -> Self {
        self.payment_reference = Some(reference.into());
        self
    }
}

/// Writer for the audit trail.
#[derive(Clone)]
pub struct BillingEventLogger {
    pool: PgPool,
}

impl BillingEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one event row.
    pub async fn log_event(&self, event: BillingEventBuilder) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_events
                (user_id, event_type, actor_type, data, purchase_id, payment_reference)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.user_id)
        .bind(event.event_type.as_str())
        .bind(event.actor_type.as_str())
        .bind(&event.data)
        .bind(event.purchase_id)
        .bind(&event.payment_reference)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
