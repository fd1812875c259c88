//! Unified error handling for the payments backend
//!
//! Layer-specific errors (gateway, storage, orchestration) convert into
//! [`AppError`], which carries the HTTP status, a stable error code for
//! clients and a user-facing message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes for programmatic handling by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "INSUFFICIENT_DEPOSIT")]
    InsufficientDeposit,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,
    #[serde(rename = "QUOTE_NOT_PAYABLE")]
    QuoteNotPayable,
    #[serde(rename = "QUOTE_NOT_FOUND")]
    QuoteNotFound,
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "DUPLICATE_REFERENCE")]
    DuplicateReference,
    #[serde(rename = "INVALID_TRANSITION")]
    InvalidTransition,
    #[serde(rename = "STALE_STATE")]
    StaleState,
    #[serde(rename = "GATEWAY_DISABLED")]
    GatewayDisabled,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503)
    #[serde(rename = "GATEWAY_UNAVAILABLE")]
    GatewayUnavailable,
    #[serde(rename = "GATEWAY_REJECTED")]
    GatewayRejected,

    // Generic
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Deposit below the configured share of the quote total
    InsufficientDeposit { required: String, provided: String },
    /// Amount does not fit the quote's outstanding balance
    InvalidAmount { amount: String, reason: String },
    /// Quote is not in a status that accepts payments
    QuoteNotPayable { quote_id: String, status: String },
    QuoteNotFound { quote_id: String },
    TransactionNotFound { reference: String },
    DuplicateReference { reference: String },
    /// Requested state change is not an edge of the lifecycle
    InvalidTransition {
        reference: String,
        from: String,
        to: String,
    },
    /// Another writer moved the transaction first
    StaleState { reference: String },
    GatewayDisabled { gateway: String },
    Unauthorized,
    Forbidden { reason: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

/// Payment gateway errors
#[derive(Debug, Clone)]
pub enum ExternalError {
    GatewayUnavailable { gateway: String, message: String },
    GatewayRejected { gateway: String, message: String },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidAmount { amount: String, reason: String },
    InvalidSignature { reason: String },
    MissingField { field: String },
    InvalidField { field: String, reason: String },
    MalformedPayload { reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientDeposit { .. } => 422,
                DomainError::InvalidAmount { .. } => 422,
                DomainError::QuoteNotPayable { .. } => 409,
                DomainError::QuoteNotFound { .. } => 404,
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::DuplicateReference { .. } => 409,
                DomainError::InvalidTransition { .. } => 409,
                DomainError::StaleState { .. } => 409,
                DomainError::GatewayDisabled { .. } => 400,
                DomainError::Unauthorized => 401,
                DomainError::Forbidden { .. } => 403,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayUnavailable { .. } => 503,
                ExternalError::GatewayRejected { .. } => 502,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidSignature { .. } => 401,
                _ => 400,
            },
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientDeposit { .. } => ErrorCode::InsufficientDeposit,
                DomainError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
                DomainError::QuoteNotPayable { .. } => ErrorCode::QuoteNotPayable,
                DomainError::QuoteNotFound { .. } => ErrorCode::QuoteNotFound,
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::DuplicateReference { .. } => ErrorCode::DuplicateReference,
                DomainError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
                DomainError::StaleState { .. } => ErrorCode::StaleState,
                DomainError::GatewayDisabled { .. } => ErrorCode::GatewayDisabled,
                DomainError::Unauthorized => ErrorCode::Unauthorized,
                DomainError::Forbidden { .. } => ErrorCode::Forbidden,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayUnavailable { .. } => ErrorCode::GatewayUnavailable,
                ExternalError::GatewayRejected { .. } => ErrorCode::GatewayRejected,
            },
            AppErrorKind::Validation(ValidationError::InvalidSignature { .. }) => {
                ErrorCode::InvalidSignature
            }
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientDeposit { required, provided } => format!(
                    "Deposit of {} is below the required minimum of {}",
                    provided, required
                ),
                DomainError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                DomainError::QuoteNotPayable { quote_id, status } => format!(
                    "Quote '{}' cannot accept payments while '{}'",
                    quote_id, status
                ),
                DomainError::QuoteNotFound { quote_id } => {
                    format!("Quote '{}' not found", quote_id)
                }
                DomainError::TransactionNotFound { reference } => {
                    format!("Transaction '{}' not found", reference)
                }
                DomainError::DuplicateReference { reference } => {
                    format!("Transaction '{}' already exists", reference)
                }
                DomainError::InvalidTransition {
                    reference,
                    from,
                    to,
                } => format!(
                    "Transaction '{}' cannot move from {} to {}",
                    reference, from, to
                ),
                DomainError::StaleState { reference } => format!(
                    "Transaction '{}' was updated concurrently. Please retry",
                    reference
                ),
                DomainError::GatewayDisabled { gateway } => {
                    format!("Payment method '{}' is not available", gateway)
                }
                DomainError::Unauthorized => "Authentication required".to_string(),
                DomainError::Forbidden { reason } => reason.clone(),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayUnavailable { gateway, .. } => format!(
                    "Payment gateway ({}) is temporarily unavailable. Please try again",
                    gateway
                ),
                ExternalError::GatewayRejected { gateway, .. } => format!(
                    "Payment gateway ({}) rejected the request. Please contact support",
                    gateway
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::InvalidSignature { .. } => "Invalid webhook signature".to_string(),
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::MalformedPayload { reason } => {
                    format!("Malformed payload: {}", reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(DomainError::StaleState { .. }) => true,
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::GatewayUnavailable { .. } => true,
                ExternalError::GatewayRejected { .. } => false,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs and From<OrchestratorError>
// in services/payment_orchestrator.rs.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_deposit_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::InsufficientDeposit {
            required: "30000.00".to_string(),
            provided: "29999.99".to_string(),
        }));

        assert_eq!(error.status_code(), 422);
        assert_eq!(error.error_code(), ErrorCode::InsufficientDeposit);
        assert!(error.user_message().contains("30000.00"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_gateway_unavailable_error() {
        let error = AppError::new(AppErrorKind::External(ExternalError::GatewayUnavailable {
            gateway: "paystack".to_string(),
            message: "timeout".to_string(),
        }));

        assert_eq!(error.status_code(), 503);
        assert_eq!(error.error_code(), ErrorCode::GatewayUnavailable);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_signature_error_is_unauthorized() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidSignature {
            reason: "mismatch".to_string(),
        }));

        assert_eq!(error.status_code(), 401);
        assert_eq!(error.error_code(), ErrorCode::InvalidSignature);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount cannot be negative".to_string(),
        }));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_error_code_serializes_screaming() {
        let json = serde_json::to_string(&ErrorCode::DuplicateReference).unwrap();
        assert_eq!(json, "\"DUPLICATE_REFERENCE\"");
    }
}
