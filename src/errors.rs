use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Standard error body returned by every failing JSON endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Unprocessable Entity")
    pub error: String,
    /// Stable machine-readable error code
    pub code: String,
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

    #[error("Cart contains no valid items")]
    NoItems,

    #[error("Product {0} does not exist")]
    InvalidProduct(i64),

    #[error("Coupon code is invalid or not currently active")]
    CouponInvalid,

    #[error("Coupon does not apply to any item in this cart")]
    CouponNotApplicable,

    #[error("Order subtotal is below the coupon's minimum purchase")]
    CouponMinNotMet,

    #[error("Coupon usage limit has been reached")]
    CouponExhausted,

    #[error("Confirmation token is invalid")]
    TokenInvalid,

    #[error("Confirmation token has expired")]
    TokenExpired,

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Cannot transition order from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),

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
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::NoItems
            | Self::InvalidStatus(_)
            | Self::TokenInvalid
            | Self::TokenExpired => StatusCode::BAD_REQUEST,
            Self::InvalidProduct(_)
            | Self::CouponInvalid
            | Self::CouponNotApplicable
            | Self::CouponMinNotMet => StatusCode::UNPROCESSABLE_ENTITY,
            Self::CouponExhausted | Self::Conflict(_) | Self::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
        }
    }

    /// Stable snake_case code clients can branch on, e.g. to prompt coupon
    /// re-entry versus giving up.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::NoItems => "no_items",
            Self::InvalidProduct(_) => "invalid_product",
            Self::CouponInvalid => "coupon_invalid",
            Self::CouponNotApplicable => "coupon_not_applicable",
            Self::CouponMinNotMet => "coupon_min_not_met",
            Self::CouponExhausted => "coupon_exhausted",
            Self::TokenInvalid => "token_invalid",
            Self::TokenExpired => "token_expired",
            Self::InvalidStatus(_) => "invalid_status",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Conflict(_) => "conflict",
            Self::InternalError(_) => "internal_error",
            Self::Other(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Transient store failures are worth retrying; everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DatabaseError(err) if crate::db::is_transient_db_err(err))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.error_code().to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

/// API error type for handler-level failures not produced by the service layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::ServiceError(service_error) => {
                return service_error_response(service_error);
            }
            ApiError::ValidationError(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", msg.clone())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
        };

        let err = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            code: code.to_string(),
            message,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

fn service_error_response(err: &ServiceError) -> Response {
    let status = err.status_code();
    let body = ErrorResponse {
        error: status.canonical_reason().unwrap_or("Error").to_string(),
        code: err.error_code().to_string(),
        message: err.response_message(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ServiceError::NoItems.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::InvalidProduct(7).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::CouponInvalid.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::CouponExhausted.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::InvalidTransition {
                from: "SHIPPED".into(),
                to: "VERIFIED".into()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::InternalError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn coupon_errors_have_distinct_codes() {
        let codes = [
            ServiceError::CouponInvalid.error_code(),
            ServiceError::CouponNotApplicable.error_code(),
            ServiceError::CouponMinNotMet.error_code(),
            ServiceError::CouponExhausted.error_code(),
        ];
        let mut deduped = codes.to_vec();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), codes.len());
    }

    #[test]
    fn internal_errors_hide_details() {
        assert_eq!(
            ServiceError::InternalError("db password leaked".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::CouponMinNotMet.response_message(),
            "Order subtotal is below the coupon's minimum purchase"
        );
    }

    #[tokio::test]
    async fn error_response_body_carries_code() {
        let response = ServiceError::CouponExhausted.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.code, "coupon_exhausted");
    }
}
