use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::services::discounts::DiscountRejection;
use crate::utils::response::error as error_response;

/// Expected, user-correctable outcomes raised from inside a transaction.
/// Raising one aborts the transaction; the message is shown to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Ticket type {0} does not exist for this event")]
    UnknownTicketType(uuid::Uuid),

    #[error("Ticket type '{name}' is not on sale")]
    TicketTypeInactive { name: String },

    #[error("Not enough tickets for '{name}': only {remaining} left")]
    InsufficientCapacity { name: String, remaining: u32 },

    #[error(transparent)]
    Discount(#[from] DiscountRejection),

    #[error("Order is {status} and cannot be confirmed")]
    OrderNotConfirmable { status: String },

    #[error("This courtesy code has already been claimed")]
    CourtesyAlreadyClaimed,

    #[error("This courtesy code has expired")]
    CourtesyExpired,

    #[error("Attendee name and DNI are required")]
    MissingAttendee,
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::UnknownTicketType(_) => "UNKNOWN_TICKET_TYPE",
            Rejection::TicketTypeInactive { .. } => "TICKET_TYPE_INACTIVE",
            Rejection::InsufficientCapacity { .. } => "INSUFFICIENT_CAPACITY",
            Rejection::Discount(reason) => reason.code(),
            Rejection::OrderNotConfirmable { .. } => "ORDER_NOT_CONFIRMABLE",
            Rejection::CourtesyAlreadyClaimed => "COURTESY_ALREADY_CLAIMED",
            Rejection::CourtesyExpired => "COURTESY_EXPIRED",
            Rejection::MissingAttendee => "MISSING_ATTENDEE",
        }
    }

    /// Order-path rejections keep the 500 + reason contract the storefront
    /// already handles; claim rejections are plain bad requests.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Rejection::UnknownTicketType(_)
            | Rejection::TicketTypeInactive { .. }
            | Rejection::InsufficientCapacity { .. }
            | Rejection::Discount(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Rejection::OrderNotConfirmable { .. } => StatusCode::CONFLICT,
            Rejection::CourtesyAlreadyClaimed
            | Rejection::CourtesyExpired
            | Rejection::MissingAttendee => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("Transaction exceeded its time budget")]
    Timeout,

    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Rejected(rejection) => rejection.status_code(),
            AppError::Timeout | AppError::Conflict(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Rejected(rejection) => rejection.code(),
            AppError::Timeout => "TRANSACTION_TIMEOUT",
            AppError::Conflict(_) => "WRITE_CONFLICT",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Safe to resubmit unchanged: nothing from the failed attempt survived.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Timeout | AppError::Conflict(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            AppError::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }

    fn log(&self) {
        match self {
            AppError::Rejected(rejection) => {
                warn!(code = rejection.code(), reason = %rejection, "Request rejected");
            }
            AppError::ValidationError(msg)
            | AppError::AuthError(msg)
            | AppError::NotFound(msg) => {
                warn!(code = self.code(), message = %msg, "Client error");
            }
            AppError::Timeout => {
                error!("Transaction timed out and was rolled back");
            }
            AppError::Conflict(msg) | AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        let public_message = match &self {
            AppError::ValidationError(msg)
            | AppError::AuthError(msg)
            | AppError::NotFound(msg) => msg.clone(),
            AppError::Rejected(rejection) => rejection.to_string(),
            AppError::Timeout | AppError::Conflict(_) => {
                "The request could not be completed, please try again".to_string()
            }
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(msg) => msg.clone(),
        };

        let details = self
            .is_retryable()
            .then(|| json!({ "retryable": true }));

        error_response(code, public_message, details, status)
    }
}
