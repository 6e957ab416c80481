// crates/backend-lib/src/error.rs

//! Central error type + Axum integration.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use eventroom_common::{EventId, ServerFrame};
use thiserror::Error;

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    /// The event has no room left for another confirmed attendee
    #[error("Event {0} is at capacity")]
    AtCapacity(EventId),

    /// The requested ticket type has no room left
    #[error("Ticket type {0} is at capacity")]
    TypeAtCapacity(uuid::Uuid),

    /// The ticket type needs organizer approval before a going RSVP
    #[error("Ticket type {0} requires approval")]
    RequiresApproval(uuid::Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Authentication error: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The backing store could not complete the transaction
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The connection's outbound queue is full
    #[error("Overloaded: {0}")]
    Overloaded(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::AtCapacity(_)
            | AppError::TypeAtCapacity(_)
            | AppError::RequiresApproval(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::StoreUnavailable(_) | AppError::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) | AppError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the machine-readable code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::AtCapacity(_) => "AT_CAPACITY",
            AppError::TypeAtCapacity(_) => "TYPE_AT_CAPACITY",
            AppError::RequiresApproval(_) => "REQUIRES_APPROVAL",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidInput(_) => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            AppError::Overloaded(_) => "OVERLOADED",
            AppError::Internal(_) | AppError::Json(_) => "INTERNAL_ERROR",
        }
    }

    /// Capacity and policy rejections are expected outcomes, not faults
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            AppError::AtCapacity(_) | AppError::TypeAtCapacity(_) | AppError::RequiresApproval(_)
        )
    }

    /// Get a message safe to show to clients
    pub fn sanitized_message(&self) -> String {
        match self {
            AppError::AtCapacity(_) => "Event is at capacity, join the waitlist instead".to_string(),
            AppError::TypeAtCapacity(_) => "This ticket type is sold out".to_string(),
            AppError::RequiresApproval(_) => {
                "This ticket type requires organizer approval".to_string()
            },
            AppError::NotFound(what) => format!("{what} not found"),
            AppError::InvalidInput(reason) => reason.clone(),
            AppError::Unauthorized(_) => "Authentication failed".to_string(),
            AppError::Forbidden(reason) => reason.clone(),
            AppError::StoreUnavailable(_) => {
                "Service temporarily unavailable, please retry".to_string()
            },
            AppError::Overloaded(_) => "Too many pending frames, please retry".to_string(),
            AppError::Internal(_) | AppError::Json(_) => {
                "An internal server error occurred".to_string()
            },
        }
    }

    /// Render this error as a protocol `error` frame
    pub fn to_frame(&self, event_id: Option<EventId>) -> ServerFrame {
        ServerFrame::error(event_id, self.error_code(), self.sanitized_message())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), "request failed: {self}");
        }

        let body = serde_json::json!({
            "error": {
                "code": self.error_code(),
                "message": self.sanitized_message(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Store I/O failures are transient from the caller's point of view
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::StoreUnavailable(err.to_string())
    }
}
