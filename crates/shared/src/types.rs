//! Enums shared across the api, billing, and worker crates.

use serde::{Deserialize, Serialize};

/// External payment provider identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    Midtrans,
    Xendit,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Midtrans => "midtrans",
            PaymentProvider::Xendit => "xendit",
        }
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a purchase is paid for.
///
/// Provider-backed methods get an invoice/order from the gateway at checkout;
/// `Manual` purchases wait for an operator to confirm an offline transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Midtrans,
    Xendit,
    Manual,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Midtrans => "midtrans",
            PaymentMethod::Xendit => "xendit",
            PaymentMethod::Manual => "manual",
        }
    }

    /// Provider behind this method, if any.
    pub fn provider(&self) -> Option<PaymentProvider> {
        match self {
            PaymentMethod::Midtrans => Some(PaymentProvider::Midtrans),
            PaymentMethod::Xendit => Some(PaymentProvider::Xendit),
            PaymentMethod::Manual => None,
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "midtrans" => Ok(PaymentMethod::Midtrans),
            "xendit" => Ok(PaymentMethod::Xendit),
            "manual" => Ok(PaymentMethod::Manual),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_method_round_trips_through_str() {
        for method in [
            PaymentMethod::Midtrans,
            PaymentMethod::Xendit,
            PaymentMethod::Manual,
        ] {
            assert_eq!(method.as_str().parse::<PaymentMethod>(), Ok(method));
        }
    }

    #[test]
    fn manual_method_has_no_provider() {
        assert_eq!(PaymentMethod::Manual.provider(), None);
        assert_eq!(
            PaymentMethod::Midtrans.provider(),
            Some(PaymentProvider::Midtrans)
        );
    }
}
