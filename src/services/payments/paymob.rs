//! Redirect/iframe provider: obtain an auth token, register the order
//! remotely keyed by the local order id, request a payment key with billing
//! data, and hand the client an iframe URL. Confirmation always arrives
//! out-of-band on the webhook.

use super::{
    BillingInfo, PaymentConfirmation, PaymentInitiation, PaymentLineItem, PaymentProvider,
    RefundOutcome,
};
use crate::config::PaymobConfig;
use crate::entities::order;
use crate::errors::ServiceError;
use async_trait::async_trait;
use http::HeaderMap;
use serde::Deserialize;
use serde_json::json;
use tracing::{instrument, warn};
use uuid::Uuid;

const PAYMENT_KEY_EXPIRATION_SECS: u32 = 3600;

pub struct PaymobProvider {
    http: reqwest::Client,
    api_key: String,
    integration_id: String,
    iframe_id: String,
    base_url: String,
    return_url: Option<String>,
    currency: String,
}

#[derive(Deserialize)]
struct AuthTokenResponse {
    token: String,
}

#[derive(Deserialize)]
struct RemoteOrderResponse {
    id: i64,
}

#[derive(Deserialize)]
struct PaymentKeyResponse {
    token: String,
}

#[derive(Deserialize)]
struct RefundResponse {
    #[serde(default)]
    success: bool,
}

/// Webhook body shape: `{ "obj": { "success", "id", "order": { "merchant_order_id" } } }`.
#[derive(Deserialize)]
struct WebhookEnvelope {
    obj: Option<WebhookObject>,
}

#[derive(Deserialize)]
struct WebhookObject {
    #[serde(default)]
    success: bool,
    id: Option<i64>,
    order: Option<WebhookOrder>,
}

#[derive(Deserialize)]
struct WebhookOrder {
    merchant_order_id: Option<String>,
}

impl PaymobProvider {
    pub fn new(cfg: &PaymobConfig, currency: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: cfg.api_key.clone(),
            integration_id: cfg.integration_id.clone(),
            iframe_id: cfg.iframe_id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            return_url: cfg.return_url.clone(),
            currency: currency.to_string(),
        }
    }

    async fn auth_token(&self) -> Result<String, ServiceError> {
        let response: AuthTokenResponse = self
            .post_json("/auth/tokens", &json!({ "api_key": self.api_key }))
            .await?;
        Ok(response.token)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ServiceError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("paymob {}: {}", path, e)))?
            .error_for_status()
            .map_err(|e| ServiceError::ExternalServiceError(format!("paymob {}: {}", path, e)))?;

        response.json::<T>().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("paymob {}: invalid response: {}", path, e))
        })
    }

    fn parse_order_id(raw: &str) -> Result<Uuid, ServiceError> {
        Uuid::parse_str(raw).map_err(|_| {
            ServiceError::MalformedEvent(format!("merchant_order_id '{}' is not a UUID", raw))
        })
    }
}

#[async_trait]
impl PaymentProvider for PaymobProvider {
    fn name(&self) -> &'static str {
        "paymob"
    }

    #[instrument(skip(self, lines, billing), fields(order_id = %order.id))]
    async fn initiate(
        &self,
        order: &order::Model,
        lines: &[PaymentLineItem],
        billing: &BillingInfo,
    ) -> Result<PaymentInitiation, ServiceError> {
        let amount_cents = super::to_minor_units(order.total_price)?;
        let auth_token = self.auth_token().await?;

        let items: Vec<serde_json::Value> = lines
            .iter()
            .map(|l| {
                json!({
                    "name": l.name,
                    "amount_cents": l.amount_cents,
                    "quantity": l.quantity,
                })
            })
            .collect();

        let remote: RemoteOrderResponse = self
            .post_json(
                "/ecommerce/orders",
                &json!({
                    "auth_token": auth_token,
                    "delivery_needed": false,
                    "amount_cents": amount_cents,
                    "currency": self.currency,
                    "items": items,
                    "merchant_order_id": order.id.to_string(),
                }),
            )
            .await?;

        let billing_data = json!({
            "apartment": "NA",
            "email": billing.email,
            "floor": "NA",
            "first_name": billing.first_name,
            "last_name": billing.last_name,
            "phone_number": billing.phone,
            "building": "NA",
            "city": billing.city,
            "country": billing.country,
            "state": "NA",
            "street": billing.street,
        });

        let mut payment_key_body = json!({
            "auth_token": auth_token,
            "amount_cents": amount_cents,
            "expiration": PAYMENT_KEY_EXPIRATION_SECS,
            "order_id": remote.id,
            "billing_data": billing_data,
            "currency": self.currency,
            "integration_id": self.integration_id,
        });
        if let Some(return_url) = &self.return_url {
            payment_key_body["return_url"] =
                json!(format!("{}/{}", return_url.trim_end_matches('/'), order.id));
        }

        let key: PaymentKeyResponse = self
            .post_json("/acceptance/payment_keys", &payment_key_body)
            .await?;

        Ok(PaymentInitiation::Redirect {
            url: format!(
                "{}/acceptance/iframes/{}?payment_token={}",
                self.base_url, self.iframe_id, key.token
            ),
        })
    }

    fn verify_and_extract(
        &self,
        body: &[u8],
        _headers: &HeaderMap,
    ) -> Result<PaymentConfirmation, ServiceError> {
        let envelope: WebhookEnvelope = serde_json::from_slice(body)
            .map_err(|e| ServiceError::MalformedEvent(format!("invalid json: {}", e)))?;

        let obj = envelope
            .obj
            .ok_or_else(|| ServiceError::MalformedEvent("missing 'obj' payload".to_string()))?;

        let transaction_id = obj
            .id
            .ok_or_else(|| ServiceError::MalformedEvent("missing transaction id".to_string()))?;

        let merchant_order_id = obj
            .order
            .and_then(|o| o.merchant_order_id)
            .ok_or_else(|| {
                ServiceError::MalformedEvent("missing order.merchant_order_id".to_string())
            })?;

        Ok(PaymentConfirmation {
            external_transaction_id: transaction_id.to_string(),
            local_order_id: Self::parse_order_id(&merchant_order_id)?,
            success: obj.success,
        })
    }

    #[instrument(skip(self))]
    async fn refund(
        &self,
        transaction_id: &str,
        amount_minor: i64,
    ) -> Result<RefundOutcome, ServiceError> {
        let auth_token = self.auth_token().await?;

        let response: RefundResponse = self
            .post_json(
                "/acceptance/void_refund/refund",
                &json!({
                    "auth_token": auth_token,
                    "transaction_id": transaction_id,
                    "amount_cents": amount_minor,
                }),
            )
            .await?;

        if !response.success {
            warn!(transaction_id, "paymob refund rejected");
        }

        Ok(RefundOutcome {
            success: response.success,
            provider_error: if response.success {
                None
            } else {
                Some("refund rejected by provider".to_string())
            },
        })
    }
}
