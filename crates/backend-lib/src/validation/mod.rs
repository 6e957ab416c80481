// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Input validation for requests entering the admission and chat paths.

use crate::error::AppError;
use crate::models::{NewEvent, TicketKind};
use eventroom_common::MAX_PLUS_ONES;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

const MAX_TITLE_LENGTH: usize = 200;
const MAX_TICKET_TYPE_NAME_LENGTH: usize = 100;
pub const MAX_MESSAGE_LENGTH: usize = 2000;
const MAX_USER_ID_LENGTH: usize = 64;

static USER_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._-]+$").expect("user id pattern is valid"));

/// Possible validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid plus-ones: {0}")]
    InvalidPlusOnes(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Invalid capacity: {0}")]
    InvalidCapacity(String),

    #[error("Invalid ticket type: {0}")]
    InvalidTicketType(String),

    #[error("Invalid user id: {0}")]
    InvalidUserId(String),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

pub fn validate_plus_ones(plus_ones: u8) -> ValidationResult<u8> {
    if plus_ones > MAX_PLUS_ONES {
        return Err(ValidationError::InvalidPlusOnes(format!(
            "At most {MAX_PLUS_ONES} guests are allowed"
        )));
    }
    Ok(plus_ones)
}

/// Validate a chat message body, returning it trimmed
pub fn validate_message_body(body: &str) -> ValidationResult<&str> {
    let body = body.trim();
    if body.is_empty() {
        return Err(ValidationError::InvalidMessage(
            "Message must not be empty".to_string(),
        ));
    }

    if body.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ValidationError::InvalidMessage(format!(
            "Message cannot exceed {MAX_MESSAGE_LENGTH} characters"
        )));
    }

    Ok(body)
}

/// A capacity, when given, must admit at least one attendee
pub fn validate_capacity(capacity: Option<u32>) -> ValidationResult<Option<u32>> {
    match capacity {
        Some(0) => Err(ValidationError::InvalidCapacity(
            "Capacity must be positive, or omitted for unlimited".to_string(),
        )),
        other => Ok(other),
    }
}

pub fn validate_new_event(event: &NewEvent) -> ValidationResult<()> {
    let title = event.title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_LENGTH {
        return Err(ValidationError::InvalidEvent(format!(
            "Title must be between 1 and {MAX_TITLE_LENGTH} characters"
        )));
    }

    if event.ends_at <= event.starts_at {
        return Err(ValidationError::InvalidEvent(
            "Event must end after it starts".to_string(),
        ));
    }

    validate_capacity(event.capacity)?;

    for ticket_type in &event.ticket_types {
        let name = ticket_type.name.trim();
        if name.is_empty() || name.chars().count() > MAX_TICKET_TYPE_NAME_LENGTH {
            return Err(ValidationError::InvalidTicketType(format!(
                "Name must be between 1 and {MAX_TICKET_TYPE_NAME_LENGTH} characters"
            )));
        }
        if ticket_type.capacity == Some(0) {
            return Err(ValidationError::InvalidTicketType(format!(
                "Capacity of '{name}' must be positive"
            )));
        }
        if ticket_type.kind == TicketKind::Paid && ticket_type.price_cents.unwrap_or(0) == 0 {
            return Err(ValidationError::InvalidTicketType(format!(
                "Paid ticket type '{name}' needs a price"
            )));
        }
    }

    Ok(())
}

/// Validate a user id before a credential is issued for it
pub fn validate_user_id(user_id: &str) -> ValidationResult<&str> {
    if user_id.is_empty() || user_id.len() > MAX_USER_ID_LENGTH {
        return Err(ValidationError::InvalidUserId(format!(
            "User id must be between 1 and {MAX_USER_ID_LENGTH} characters"
        )));
    }

    if !USER_ID_REGEX.is_match(user_id) {
        return Err(ValidationError::InvalidUserId(
            "User id may only contain letters, digits, '.', '_' and '-'".to_string(),
        ));
    }

    Ok(user_id)
}
