use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Simplified error structure for OpenAPI documentation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Not Found",
    "message": "No payment transaction for tracking id GW-550e8400",
    "details": null,
    "request_id": "req-abc123xyz",
    "timestamp": "2025-06-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request", "Internal Server Error")
    #[schema(example = "Not Found")]
    pub error: String,
    /// Human-readable error description
    #[schema(example = "No payment transaction for tracking id GW-550e8400")]
    pub message: String,
    /// Additional error details (validation errors, supplementary context)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "Field 'currency' must be a 3-letter code")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    #[schema(example = "2025-06-09T10:30:00.000Z")]
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Gateway credential exchange failed.
    #[error("Gateway authentication error: {0}")]
    AuthError(String),

    /// The gateway could not be reached, or kept failing with 5xx until the
    /// retry budget ran out.
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// The gateway rejected an order submission with a 4xx. The code and
    /// message come from the gateway verbatim and are safe to show the user.
    #[error("Gateway rejected order ({code}): {message}")]
    GatewayOrder { code: String, message: String },

    /// Status query exhausted its retry budget without a usable status code.
    #[error("Gateway status unavailable: {0}")]
    StatusUnavailable(String),

    /// A callback or sync referenced a transaction the ledger does not hold.
    #[error("Payment transaction not found: {0}")]
    TransactionNotFound(String),

    /// A conditional status update matched zero rows. Inside the reconciler
    /// this is a no-op, not a failure; it only surfaces when a caller insists
    /// on a transition that already lost.
    #[error("Transition conflict on transaction {transaction_id}")]
    TransitionConflict { transaction_id: Uuid },

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

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

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) | Self::TransactionNotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidInput(_) | Self::InvalidOperation(_) => {
                StatusCode::BAD_REQUEST
            }
            // The remote side failed, not the caller's request.
            Self::AuthError(_) | Self::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::GatewayOrder { .. } | Self::InsufficientStock(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::StatusUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::TransitionConflict { .. } => StatusCode::CONFLICT,
            Self::EventError(_)
            | Self::NotificationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            // For internal errors, return generic messages to avoid leaking details
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_)
            | Self::NotificationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => "Internal server error".to_string(),
            // Which credential failed and how is not the caller's business.
            Self::AuthError(_) | Self::GatewayUnavailable(_) => {
                "Payment gateway unavailable".to_string()
            }
            Self::StatusUnavailable(_) => {
                "Payment status temporarily unavailable; try again shortly".to_string()
            }
            Self::TransitionConflict { transaction_id } => {
                format!(
                    "Payment {} was updated concurrently; no change applied",
                    transaction_id
                )
            }
            // The gateway's own message is the user-facing text by contract.
            Self::GatewayOrder { message, .. } => message.clone(),
            // For user-facing errors, return the actual message
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = self.response_message();

        let request_id = current_request_id();
        // Build standardized error response
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: error_message,
            details: None,
            request_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

// Type alias kept for modules written against the older name
pub type AppError = ServiceError;
