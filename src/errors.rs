use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Standard error body returned by every handler.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Coupon not found: {0}")]
    InvalidCoupon(String),

    #[error("Coupon already used: {0}")]
    CouponAlreadyUsed(String),

    #[error("Refund window expired: order was created more than {0} days ago")]
    RefundWindowExpired(i64),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Malformed payment event: {0}")]
    MalformedEvent(String),

    #[error("Payment gateway error: {0}")]
    ExternalServiceError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Internal server error")]
    InternalServerError,

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::InvalidOperation(_)
            | Self::InvalidCoupon(_)
            | Self::CouponAlreadyUsed(_)
            | Self::RefundWindowExpired(_)
            | Self::InvalidSignature
            | Self::MalformedEvent(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_)
            | Self::InternalError(_)
            | Self::InternalServerError
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::InternalServerError | Self::Other(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
