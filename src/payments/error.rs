use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    /// Transport failure, timeout, non-2xx status or malformed body after
    /// local retries were exhausted.
    #[error("Gateway unavailable: gateway={gateway}, message={message}")]
    GatewayUnavailable { gateway: String, message: String },

    /// The provider answered well-formed but refused the operation.
    #[error("Gateway rejected request: gateway={gateway}, message={message}")]
    ProviderRejected { gateway: String, message: String },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },
}

impl PaymentError {
    pub fn unavailable(gateway: &str, message: impl Into<String>) -> Self {
        PaymentError::GatewayUnavailable {
            gateway: gateway.to_string(),
            message: message.into(),
        }
    }

    pub fn rejected(gateway: &str, message: impl Into<String>) -> Self {
        PaymentError::ProviderRejected {
            gateway: gateway.to_string(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::GatewayUnavailable { .. })
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::GatewayUnavailable { .. } => 503,
            PaymentError::ProviderRejected { .. } => 502,
            PaymentError::WebhookVerificationError { .. } => 401,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::GatewayUnavailable { .. } => {
                "Payment gateway is temporarily unavailable".to_string()
            }
            PaymentError::ProviderRejected { .. } => {
                "Payment gateway rejected the request".to_string()
            }
            PaymentError::WebhookVerificationError { .. } => {
                "Invalid webhook signature".to_string()
            }
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        match err {
            PaymentError::ValidationError { message, field } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                }))
            }
            PaymentError::WebhookVerificationError { message } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidSignature {
                    reason: message,
                }))
            }
            PaymentError::GatewayUnavailable { gateway, message } => {
                AppError::new(AppErrorKind::External(ExternalError::GatewayUnavailable {
                    gateway,
                    message,
                }))
            }
            PaymentError::ProviderRejected { gateway, message } => {
                AppError::new(AppErrorKind::External(ExternalError::GatewayRejected {
                    gateway,
                    message,
                }))
            }
        }
    }
}
