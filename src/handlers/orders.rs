use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    entities::order::ShippingStatus,
    errors::ServiceError,
    handlers::AuthenticatedUser,
    services::checkout::{CheckoutOutcome, CheckoutRequest},
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl ListQuery {
    fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    fn per_page(&self) -> u64 {
        self.per_page.unwrap_or(20).clamp(1, 100)
    }
}

#[derive(Debug, Deserialize)]
pub struct ShippingStatusBody {
    pub shipping_status: String,
}

/// POST /orders — checkout from the caller's cart. Cash orders are placed
/// immediately (201); online orders return the provider handoff (200).
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state
        .services
        .checkout
        .place_order(user.user_id, body)
        .await?;

    let status = match &outcome {
        CheckoutOutcome::Placed(_) => StatusCode::CREATED,
        _ => StatusCode::OK,
    };

    Ok((status, Json(ApiResponse::success(outcome))))
}

/// GET /orders — every order, newest first, for back-office listings.
pub async fn list_orders(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = state
        .services
        .orders
        .list_orders(query.page(), query.per_page())
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

/// GET /orders/user/:user_id — one user's orders, newest first.
pub async fn list_user_orders(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = state
        .services
        .orders
        .list_user_orders(user_id, query.page(), query.per_page())
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

/// GET /orders/:id — one order with its item snapshots.
pub async fn get_order(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .get_order_with_items(order_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;
    Ok(Json(ApiResponse::success(order)))
}

/// PUT /orders/:id/shipping-status — fulfillment transition.
pub async fn update_shipping_status(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
    Json(body): Json<ShippingStatusBody>,
) -> Result<impl IntoResponse, ServiceError> {
    let new_status = ShippingStatus::parse(&body.shipping_status).ok_or_else(|| {
        ServiceError::ValidationError(format!(
            "Unknown shipping status: {}",
            body.shipping_status
        ))
    })?;

    let order = state
        .services
        .orders
        .update_shipping_status(order_id, new_status)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// POST /orders/:id/cancel — owner cancellation inside the refund window.
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state
        .services
        .cancellation
        .cancel_order(order_id, user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}
