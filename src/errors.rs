use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON error envelope returned from the HTTP boundary.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Cart {0} is empty")]
    EmptyCart(Uuid),

    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Payment was confirmed but order materialization did not complete.
    /// Must surface to the operator with enough context to reconcile;
    /// never reported to the caller as a payment failure.
    #[error("Checkout failed for intent {intent_id} (cart {cart_id}): {source}")]
    CheckoutFailed {
        intent_id: String,
        cart_id: Uuid,
        #[source]
        #[serde(skip)]
        source: Box<ServiceError>,
    },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Wraps a post-confirmation materialization failure with the context
    /// needed to reconcile it manually.
    pub fn checkout_failed(
        intent_id: impl Into<String>,
        cart_id: Uuid,
        source: ServiceError,
    ) -> Self {
        ServiceError::CheckoutFailed {
            intent_id: intent_id.into(),
            cart_id,
            source: Box::new(source),
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidOperation(_) | Self::EmptyCart(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::ProviderError(_)
            | Self::ExternalServiceError(_)
            | Self::CheckoutFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let details = match &self {
            ServiceError::CheckoutFailed { source, .. } => Some(source.to_string()),
            _ => None,
        };
        let body = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            message: self.to_string(),
            details,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ServiceError::NotFound("cart".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::ValidationError("bad quantity".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::EmptyCart(Uuid::new_v4()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::ProviderError("declined".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_checkout_failed_carries_cause() {
        let cart_id = Uuid::new_v4();
        let err = ServiceError::checkout_failed(
            "pi_123",
            cart_id,
            ServiceError::NotFound("variant".into()),
        );

        let message = err.to_string();
        assert!(message.contains("pi_123"));
        assert!(message.contains(&cart_id.to_string()));
        // Distinguishable from a payment failure at the status level.
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_error_response_shape() {
        let response = ErrorResponse {
            error: "Bad Request".to_string(),
            message: "Validation error: quantity must be positive".to_string(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("Bad Request"));
        assert!(!json.contains("details"));
    }
}
