//! Payment orchestration.
//!
//! Two interchangeable provider flows sit behind one `PaymentProvider`
//! contract: initiate a capture for an order, authenticate and decode an
//! inbound confirmation event, and issue a refund. The active provider for
//! outbound calls is selected by configuration; both stay registered so each
//! webhook route verifies against its own provider.

pub mod hosted_checkout;
pub mod paymob;

use crate::config::PaymentConfig;
use crate::entities::order;
use crate::errors::ServiceError;
use async_trait::async_trait;
use http::HeaderMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub use hosted_checkout::HostedCheckoutProvider;
pub use paymob::PaymobProvider;

/// A line forwarded to the provider, already in minor units.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentLineItem {
    pub name: String,
    pub amount_cents: i64,
    pub quantity: i32,
}

/// Billing data composed from the user profile and the checkout request.
#[derive(Debug, Clone, Serialize)]
pub struct BillingInfo {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub street: String,
    pub city: String,
    pub country: String,
}

/// What the client receives for an online payment: a URL to be redirected to,
/// or a session identifier to resume with the provider. Never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum PaymentInitiation {
    Redirect { url: String },
    Session { session_id: String },
}

/// An authenticated, decoded provider confirmation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub external_transaction_id: String,
    pub local_order_id: Uuid,
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct RefundOutcome {
    pub success: bool,
    pub provider_error: Option<String>,
}

/// Provider contract. `initiate` must not apply stock, coupon, or cart
/// effects; those happen only once `verify_and_extract` reports success,
/// through the reconciler.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn initiate(
        &self,
        order: &order::Model,
        lines: &[PaymentLineItem],
        billing: &BillingInfo,
    ) -> Result<PaymentInitiation, ServiceError>;

    /// Authenticates and decodes a raw webhook body. Fails with
    /// `InvalidSignature` before the payload is acted on, or with
    /// `MalformedEvent` when required fields are missing.
    fn verify_and_extract(
        &self,
        body: &[u8],
        headers: &HeaderMap,
    ) -> Result<PaymentConfirmation, ServiceError>;

    async fn refund(
        &self,
        transaction_id: &str,
        amount_minor: i64,
    ) -> Result<RefundOutcome, ServiceError>;
}

/// Registry of configured providers plus the configuration-selected active
/// one used for `initiate` and `refund`.
#[derive(Clone)]
pub struct PaymentGateway {
    providers: Vec<Arc<dyn PaymentProvider>>,
    active: usize,
}

impl std::fmt::Debug for PaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentGateway")
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("active", &self.active)
            .finish()
    }
}

impl PaymentGateway {
    pub fn new(
        providers: Vec<Arc<dyn PaymentProvider>>,
        active_name: &str,
    ) -> Result<Self, ServiceError> {
        let active = providers
            .iter()
            .position(|p| p.name() == active_name)
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "payment provider '{}' is not configured",
                    active_name
                ))
            })?;
        Ok(Self { providers, active })
    }

    pub fn from_config(cfg: &PaymentConfig) -> Result<Self, ServiceError> {
        let mut providers: Vec<Arc<dyn PaymentProvider>> = Vec::new();

        if let Some(paymob) = &cfg.paymob {
            providers.push(Arc::new(PaymobProvider::new(paymob, &cfg.currency)));
        }
        if let Some(hosted) = &cfg.hosted_checkout {
            providers.push(Arc::new(HostedCheckoutProvider::new(hosted, &cfg.currency)));
        }

        Self::new(providers, &cfg.provider)
    }

    pub fn active(&self) -> &Arc<dyn PaymentProvider> {
        &self.providers[self.active]
    }

    pub fn by_name(&self, name: &str) -> Result<&Arc<dyn PaymentProvider>, ServiceError> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| {
                ServiceError::InternalError(format!("payment provider '{}' is not configured", name))
            })
    }
}

/// Converts a decimal amount to minor units (cents), rounding half away from
/// zero at two decimal places.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| {
            ServiceError::InternalError(format!("amount {} out of range for minor units", amount))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minor_units_rounding() {
        assert_eq!(to_minor_units(dec!(194)).unwrap(), 19400);
        assert_eq!(to_minor_units(dec!(99.99)).unwrap(), 9999);
        assert_eq!(to_minor_units(dec!(10.005)).unwrap(), 1001);
        assert_eq!(to_minor_units(dec!(0)).unwrap(), 0);
    }

    #[test]
    fn gateway_requires_active_provider() {
        let err = PaymentGateway::new(Vec::new(), "paymob").unwrap_err();
        assert!(matches!(err, ServiceError::InternalError(_)));
    }

    #[test]
    fn initiation_serializes_one_artifact() {
        let redirect = PaymentInitiation::Redirect {
            url: "https://pay.example/i".into(),
        };
        let json = serde_json::to_value(&redirect).unwrap();
        assert_eq!(json["mode"], "redirect");
        assert!(json.get("session_id").is_none());

        let session = PaymentInitiation::Session {
            session_id: "cs_123".into(),
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["mode"], "session");
        assert!(json.get("url").is_none());
    }
}
