use crate::payments::error::PaymentError;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentGateway {
    Paystack,
    Flutterwave,
    BankTransfer,
    Cash,
}

impl PaymentGateway {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentGateway::Paystack => "paystack",
            PaymentGateway::Flutterwave => "flutterwave",
            PaymentGateway::BankTransfer => "bank_transfer",
            PaymentGateway::Cash => "cash",
        }
    }

    /// Hosted gateways redirect the client to a provider checkout and are
    /// verified server-to-server. Offline gateways are confirmed by an admin.
    pub fn is_hosted(&self) -> bool {
        matches!(self, PaymentGateway::Paystack | PaymentGateway::Flutterwave)
    }
}

impl std::fmt::Display for PaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentGateway {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "paystack" => Ok(PaymentGateway::Paystack),
            "flutterwave" => Ok(PaymentGateway::Flutterwave),
            "bank_transfer" | "bank-transfer" | "banktransfer" => Ok(PaymentGateway::BankTransfer),
            "cash" => Ok(PaymentGateway::Cash),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported payment gateway: {}", value),
                field: Some("payment_method".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Full,
    Deposit,
    Installment,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Full => "full",
            PaymentType::Deposit => "deposit",
            PaymentType::Installment => "installment",
        }
    }
}

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentType {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "full" => Ok(PaymentType::Full),
            "deposit" => Ok(PaymentType::Deposit),
            "installment" => Ok(PaymentType::Installment),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported payment type: {}", value),
                field: Some("payment_type".to_string()),
            }),
        }
    }
}

/// Lifecycle of a payment attempt.
///
/// `pending` is the only initial state. `completed -> refunded` is the only
/// edge leaving a terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Pending,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl TransactionState {
    pub fn valid_transitions(&self) -> &'static [TransactionState] {
        match self {
            TransactionState::Pending => &[
                TransactionState::Completed,
                TransactionState::Failed,
                TransactionState::Cancelled,
            ],
            TransactionState::Completed => &[TransactionState::Refunded],
            TransactionState::Failed | TransactionState::Cancelled | TransactionState::Refunded => {
                &[]
            }
        }
    }

    pub fn can_transition_to(&self, target: TransactionState) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionState::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Pending => "pending",
            TransactionState::Completed => "completed",
            TransactionState::Failed => "failed",
            TransactionState::Cancelled => "cancelled",
            TransactionState::Refunded => "refunded",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(TransactionState::Pending),
            "completed" => Some(TransactionState::Completed),
            "failed" => Some(TransactionState::Failed),
            "cancelled" => Some(TransactionState::Cancelled),
            "refunded" => Some(TransactionState::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Major-unit, fixed-point amount in a given currency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount: BigDecimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: BigDecimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    pub fn validate_positive(&self, field: &str) -> Result<(), PaymentError> {
        if self.amount <= BigDecimal::zero() {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeRequest {
    pub reference: String,
    pub amount: Money,
    pub customer_email: String,
    pub callback_url: Option<String>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResponse {
    pub authorization_url: String,
    pub provider_reference: Option<String>,
    pub provider_data: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub reference: String,
    /// Gateway-assigned id, when already known from a webhook or earlier verify.
    pub provider_transaction_id: Option<String>,
}

/// Provider-side outcome of a charge, already normalized.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPaymentStatus {
    Success,
    Pending,
    Failed,
    Cancelled,
}

impl GatewayPaymentStatus {
    /// The local state a pending transaction moves to, if any.
    pub fn target_state(&self) -> Option<TransactionState> {
        match self {
            GatewayPaymentStatus::Success => Some(TransactionState::Completed),
            GatewayPaymentStatus::Failed => Some(TransactionState::Failed),
            GatewayPaymentStatus::Cancelled => Some(TransactionState::Cancelled),
            GatewayPaymentStatus::Pending => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub status: GatewayPaymentStatus,
    pub reference: String,
    pub amount_paid: Option<BigDecimal>,
    pub currency: Option<String>,
    pub provider_reference: Option<String>,
    pub provider_transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub gateway_response: Option<String>,
    pub raw_payload: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub reference: String,
    pub provider_transaction_id: Option<String>,
    /// `None` refunds the full captured amount.
    pub amount: Option<Money>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Processed,
    Pending,
    Failed,
}

impl RefundStatus {
    /// Providers settle refunds asynchronously; an accepted refund counts as
    /// confirmed for reconciliation.
    pub fn is_accepted(&self) -> bool {
        matches!(self, RefundStatus::Processed | RefundStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResponse {
    pub status: RefundStatus,
    pub provider_reference: Option<String>,
    pub raw_payload: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub gateway: PaymentGateway,
    pub event_type: String,
    pub event_id: String,
    pub reference: Option<String>,
    pub provider_transaction_id: Option<String>,
    pub status: Option<GatewayPaymentStatus>,
    pub payload: JsonValue,
    pub received_at: DateTime<Utc>,
}

impl WebhookEvent {
    /// Charge events are the only ones that drive reconciliation.
    pub fn is_charge_event(&self) -> bool {
        matches!(
            self.event_type.as_str(),
            "charge.success" | "charge.completed" | "charge.failed"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_reach_every_outcome_but_refunded() {
        let pending = TransactionState::Pending;
        assert!(pending.can_transition_to(TransactionState::Completed));
        assert!(pending.can_transition_to(TransactionState::Failed));
        assert!(pending.can_transition_to(TransactionState::Cancelled));
        assert!(!pending.can_transition_to(TransactionState::Refunded));
    }

    #[test]
    fn only_completed_leaves_terminal_set() {
        assert!(TransactionState::Completed.can_transition_to(TransactionState::Refunded));
        assert!(TransactionState::Failed.valid_transitions().is_empty());
        assert!(TransactionState::Cancelled.valid_transitions().is_empty());
        assert!(TransactionState::Refunded.valid_transitions().is_empty());
        assert!(!TransactionState::Refunded.can_transition_to(TransactionState::Completed));
    }

    #[test]
    fn db_status_round_trips() {
        for state in [
            TransactionState::Pending,
            TransactionState::Completed,
            TransactionState::Failed,
            TransactionState::Cancelled,
            TransactionState::Refunded,
        ] {
            assert_eq!(TransactionState::from_db_status(state.as_str()), Some(state));
        }
        assert_eq!(TransactionState::from_db_status("processing"), None);
    }

    #[test]
    fn gateway_parsing_accepts_aliases() {
        assert_eq!(
            "Bank-Transfer".parse::<PaymentGateway>().ok(),
            Some(PaymentGateway::BankTransfer)
        );
        assert!("stripe".parse::<PaymentGateway>().is_err());
        assert!(PaymentGateway::Paystack.is_hosted());
        assert!(!PaymentGateway::Cash.is_hosted());
    }

    #[test]
    fn money_rejects_non_positive_amounts() {
        let zero = Money::new(BigDecimal::zero(), "NGN");
        assert!(zero.validate_positive("amount").is_err());

        let blank_currency = Money::new(BigDecimal::from(10), " ");
        assert!(blank_currency.validate_positive("amount").is_err());

        let ok = Money::new(BigDecimal::from_str("0.01").unwrap(), "NGN");
        assert!(ok.validate_positive("amount").is_ok());
    }
}
