//! Hosted-checkout provider: the provider owns the payment UI. We create a
//! checkout session carrying the order id as opaque metadata and later
//! receive a signed confirmation event. Signature check happens before the
//! payload is trusted.

use super::{
    BillingInfo, PaymentConfirmation, PaymentInitiation, PaymentLineItem, PaymentProvider,
    RefundOutcome,
};
use crate::config::HostedCheckoutConfig;
use crate::entities::order;
use crate::errors::ServiceError;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::instrument;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "checkout-signature";

pub const EVENT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const EVENT_SESSION_FAILED: &str = "checkout.session.failed";

pub struct HostedCheckoutProvider {
    http: reqwest::Client,
    secret_key: String,
    webhook_secret: String,
    base_url: String,
    tolerance_secs: u64,
    currency: String,
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
}

#[derive(Deserialize)]
struct RefundResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

/// Signed event body:
/// `{ "id", "type", "data": { "session_id", "transaction_id", "metadata": { "order_id", "coupon_code" } } }`
#[derive(Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: Option<WebhookData>,
}

#[derive(Deserialize)]
struct WebhookData {
    session_id: Option<String>,
    transaction_id: Option<String>,
    metadata: Option<WebhookMetadata>,
}

#[derive(Deserialize)]
struct WebhookMetadata {
    order_id: Option<String>,
}

impl HostedCheckoutProvider {
    pub fn new(cfg: &HostedCheckoutConfig, currency: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key: cfg.secret_key.clone(),
            webhook_secret: cfg.webhook_secret.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            tolerance_secs: cfg.webhook_tolerance_secs,
            currency: currency.to_string(),
        }
    }

    fn verify_signature(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), ServiceError> {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or(ServiceError::InvalidSignature)?;

        let mut timestamp = "";
        let mut signature = "";
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value,
                Some(("v1", value)) => signature = value,
                _ => {}
            }
        }
        if timestamp.is_empty() || signature.is_empty() {
            return Err(ServiceError::InvalidSignature);
        }

        let ts: i64 = timestamp.parse().map_err(|_| ServiceError::InvalidSignature)?;
        let now = chrono::Utc::now().timestamp();
        if (now - ts).unsigned_abs() > self.tolerance_secs {
            return Err(ServiceError::InvalidSignature);
        }

        let expected = compute_signature(&self.webhook_secret, ts, body);
        if constant_time_eq(&expected, signature) {
            Ok(())
        } else {
            Err(ServiceError::InvalidSignature)
        }
    }
}

#[async_trait]
impl PaymentProvider for HostedCheckoutProvider {
    fn name(&self) -> &'static str {
        "hosted_checkout"
    }

    #[instrument(skip(self, lines, _billing), fields(order_id = %order.id))]
    async fn initiate(
        &self,
        order: &order::Model,
        lines: &[PaymentLineItem],
        _billing: &BillingInfo,
    ) -> Result<PaymentInitiation, ServiceError> {
        let amount = super::to_minor_units(order.total_price)?;

        let line_items: Vec<serde_json::Value> = lines
            .iter()
            .map(|l| json!({ "name": l.name, "amount": l.amount_cents, "quantity": l.quantity }))
            .collect();

        let body = json!({
            "amount": amount,
            "currency": self.currency,
            "line_items": line_items,
            "metadata": {
                "order_id": order.id.to_string(),
                "coupon_code": order.coupon_code,
            },
        });

        let url = format!("{}/v1/checkout/sessions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("checkout session: {}", e)))?
            .error_for_status()
            .map_err(|e| ServiceError::ExternalServiceError(format!("checkout session: {}", e)))?;

        let session: SessionResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("checkout session: invalid response: {}", e))
        })?;

        Ok(PaymentInitiation::Session {
            session_id: session.id,
        })
    }

    fn verify_and_extract(
        &self,
        body: &[u8],
        headers: &HeaderMap,
    ) -> Result<PaymentConfirmation, ServiceError> {
        self.verify_signature(headers, body)?;

        let event: WebhookEvent = serde_json::from_slice(body)
            .map_err(|e| ServiceError::MalformedEvent(format!("invalid json: {}", e)))?;

        let data = event
            .data
            .ok_or_else(|| ServiceError::MalformedEvent("missing 'data' payload".to_string()))?;

        let order_id_raw = data
            .metadata
            .and_then(|m| m.order_id)
            .ok_or_else(|| ServiceError::MalformedEvent("missing metadata.order_id".to_string()))?;

        let local_order_id = Uuid::parse_str(&order_id_raw).map_err(|_| {
            ServiceError::MalformedEvent(format!("order_id '{}' is not a UUID", order_id_raw))
        })?;

        // The transaction id falls back to the session id for events emitted
        // before the provider assigns a capture reference.
        let external_transaction_id = data
            .transaction_id
            .or(data.session_id)
            .ok_or_else(|| ServiceError::MalformedEvent("missing transaction id".to_string()))?;

        Ok(PaymentConfirmation {
            external_transaction_id,
            local_order_id,
            success: event.event_type == EVENT_SESSION_COMPLETED,
        })
    }

    #[instrument(skip(self))]
    async fn refund(
        &self,
        transaction_id: &str,
        amount_minor: i64,
    ) -> Result<RefundOutcome, ServiceError> {
        let url = format!("{}/v1/refunds", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(&json!({ "transaction_id": transaction_id, "amount": amount_minor }))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("checkout refund: {}", e)))?
            .error_for_status()
            .map_err(|e| ServiceError::ExternalServiceError(format!("checkout refund: {}", e)))?;

        let refund: RefundResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("checkout refund: invalid response: {}", e))
        })?;

        let success = refund.status == "succeeded";
        Ok(RefundOutcome {
            success,
            provider_error: if success { None } else { refund.error },
        })
    }
}

/// HMAC-SHA256 over `"{timestamp}.{body}"`, hex-encoded. Shared with the test
/// harness so signed fixtures use the exact production scheme.
pub fn compute_signature(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Builds the `Checkout-Signature` header value for a payload.
pub fn signature_header(secret: &str, timestamp: i64, body: &[u8]) -> String {
    format!("t={},v1={}", timestamp, compute_signature(secret, timestamp, body))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
