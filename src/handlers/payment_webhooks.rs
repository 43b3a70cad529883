use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::{errors::ServiceError, services::reconciliation::ReconciliationOutcome, AppState};

/// POST /payments/paymob/webhook. The provider expects a 2xx acknowledgement
/// for every delivery it should stop retrying, including unsuccessful
/// payments and bodies we cannot make sense of; only an unresolvable order
/// is surfaced as 404.
#[instrument(skip_all)]
pub async fn paymob_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let provider = state.services.gateway.by_name("paymob")?;
    let confirmation = match provider.verify_and_extract(&body, &headers) {
        Ok(confirmation) => confirmation,
        Err(ServiceError::MalformedEvent(reason)) => {
            warn!(%reason, "Unrecognized Paymob event acknowledged without effects");
            return Ok((StatusCode::OK, Json(json!({ "received": true }))));
        }
        Err(err) => return Err(err),
    };

    let outcome = state
        .services
        .reconciliation
        .apply_confirmation(&confirmation)
        .await?;

    info!(outcome = ?outcome, "Paymob webhook processed");
    Ok((StatusCode::OK, Json(json!({ "received": true }))))
}

/// POST /payments/checkout/webhook. Signature failures and malformed
/// metadata are the sender's problem (400); an unknown order is 404; a
/// duplicate or failed-payment event acknowledges with 200 and no effects.
#[instrument(skip_all)]
pub async fn hosted_checkout_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let provider = state.services.gateway.by_name("hosted_checkout")?;
    let confirmation = provider.verify_and_extract(&body, &headers)?;

    let outcome = state
        .services
        .reconciliation
        .apply_confirmation(&confirmation)
        .await?;

    if outcome == ReconciliationOutcome::Ignored {
        warn!(
            order_id = %confirmation.local_order_id,
            "Checkout webhook acknowledged without effects"
        );
    }

    Ok((StatusCode::OK, Json(json!({ "received": true }))))
}
