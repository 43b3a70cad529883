pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod notifications;
pub mod services;

use axum::{
    http::HeaderValue,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use handlers::AppServices;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub services: AppServices,
}

/// Uniform success envelope. Errors go through
/// [`errors::ServiceError`]'s `IntoResponse` instead.
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// CORS policy from the comma-separated origin list in config; permissive
/// when nothing is configured.
fn cors_layer(cfg: &config::AppConfig) -> CorsLayer {
    let configured: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    match configured {
        Some(origins) => CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    }
}

/// Full application router: storefront API plus payment webhooks.
pub fn app_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health))
        .route(
            "/orders",
            post(handlers::orders::create_order).get(handlers::orders::list_orders),
        )
        .route(
            "/orders/user/:user_id",
            get(handlers::orders::list_user_orders),
        )
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/:id/shipping-status",
            put(handlers::orders::update_shipping_status),
        )
        .route("/orders/:id/cancel", post(handlers::orders::cancel_order))
        .route(
            "/payments/paymob/webhook",
            post(handlers::payment_webhooks::paymob_webhook),
        )
        .route(
            "/payments/checkout/webhook",
            post(handlers::payment_webhooks::hosted_checkout_webhook),
        )
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}
