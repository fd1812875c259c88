//! Payment Orchestrator Service
//!
//! Drives every payment attempt against a quote: validates it against the
//! reconciliation policy, hands hosted checkouts to the configured gateway,
//! and settles verified results through a single compare-and-set on the
//! transaction state.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{
    NewTransaction, Page, PageRequest, QuoteAdjustment, QuoteStore, TransactionFilter,
    TransactionStore, TransitionFields,
};
use crate::database::transaction_repository::PaymentTransaction;
use crate::error::{AppError, AppErrorKind, DomainError, ExternalError, ValidationError};
use crate::logging::mask_email;
use crate::payments::error::PaymentError;
use crate::payments::factory::GatewayRegistry;
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    GatewayPaymentStatus, InitializeRequest, Money, PaymentGateway, PaymentType, RefundRequest,
    TransactionState, VerifyRequest, VerifyResponse,
};
use crate::services::reconciliation::{validate_amount, PolicyViolation, ReconciliationPolicy};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// ============================================================================
// Configuration Types
// ============================================================================

/// Configuration for the payment orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Currency assumed when a quote carries none
    pub default_currency: String,
    /// Where hosted checkouts send the client back to
    pub callback_base_url: Option<String>,
    /// Age after which an unpaid transaction is swept to `cancelled`
    pub pending_expiry: Duration,
    pub bank_transfer_instructions: String,
    pub cash_instructions: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_currency: "NGN".to_string(),
            callback_base_url: None,
            pending_expiry: Duration::from_secs(30 * 60),
            bank_transfer_instructions:
                "Transfer the amount to the account on your quote and quote the payment reference."
                    .to_string(),
            cash_instructions: "Pay at our office and quote the payment reference.".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_currency: std::env::var("DEFAULT_CURRENCY")
                .map(|v| v.trim().to_uppercase())
                .unwrap_or(defaults.default_currency),
            callback_base_url: std::env::var("PAYMENT_CALLBACK_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            pending_expiry: std::env::var("PENDING_PAYMENT_EXPIRY_MINUTES")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(defaults.pending_expiry),
            bank_transfer_instructions: std::env::var("BANK_TRANSFER_INSTRUCTIONS")
                .unwrap_or(defaults.bank_transfer_instructions),
            cash_instructions: std::env::var("CASH_PAYMENT_INSTRUCTIONS")
                .unwrap_or(defaults.cash_instructions),
        }
    }

    fn callback_url(&self, reference: &str) -> Option<String> {
        self.callback_base_url.as_ref().map(|base| {
            let separator = if base.contains('?') { '&' } else { '?' };
            format!("{}{}reference={}", base, separator, reference)
        })
    }
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Clone)]
pub struct InitializePayment {
    pub quote_id: Uuid,
    pub gateway: PaymentGateway,
    pub payment_type: PaymentType,
    pub amount: BigDecimal,
    /// When set, the quote must belong to this client.
    pub client_id: Option<Uuid>,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializedPayment {
    pub reference: String,
    pub authorization_url: Option<String>,
    pub instructions: Option<String>,
    pub transaction: PaymentTransaction,
}

// ============================================================================
// Orchestrator Error Types
// ============================================================================

/// Orchestrator error types
#[derive(Debug)]
pub enum OrchestratorError {
    InvalidAmount { amount: String, reason: String },
    /// A gateway client refused the request before sending it
    InvalidRequest { field: String, reason: String },
    InsufficientDeposit { required: String, provided: String },
    QuoteNotPayable { quote_id: Uuid, status: String },
    GatewayDisabled { gateway: PaymentGateway },
    /// Retriable transport failure after local retries
    GatewayUnavailable { gateway: String, message: String },
    GatewayRejected { gateway: String, message: String },
    InvalidSignature { gateway: PaymentGateway },
    InvalidTransition {
        reference: String,
        from: TransactionState,
        to: TransactionState,
    },
    DuplicateReference { reference: String },
    /// Another writer changed the transaction first
    StaleState { reference: String },
    NotFound { entity: String, id: String },
    Forbidden { reason: String },
    /// Offline confirmation attempted on a hosted gateway payment
    NotOfflinePayment { reference: String, gateway: PaymentGateway },
    MalformedWebhook { reason: String },
    Storage(DatabaseError),
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAmount { amount, reason } => {
                write!(f, "Invalid amount {}: {}", amount, reason)
            }
            Self::InvalidRequest { field, reason } => {
                write!(f, "Invalid {}: {}", field, reason)
            }
            Self::InsufficientDeposit { required, provided } => {
                write!(
                    f,
                    "Deposit of {} is below the required minimum of {}",
                    provided, required
                )
            }
            Self::QuoteNotPayable { quote_id, status } => {
                write!(f, "Quote {} is {} and cannot take payments", quote_id, status)
            }
            Self::GatewayDisabled { gateway } => write!(f, "Gateway {} is not enabled", gateway),
            Self::GatewayUnavailable { gateway, message } => {
                write!(f, "Gateway {} unavailable: {}", gateway, message)
            }
            Self::GatewayRejected { gateway, message } => {
                write!(f, "Gateway {} rejected request: {}", gateway, message)
            }
            Self::InvalidSignature { gateway } => {
                write!(f, "Invalid webhook signature from {}", gateway)
            }
            Self::InvalidTransition {
                reference,
                from,
                to,
            } => write!(f, "Transaction {} cannot move from {} to {}", reference, from, to),
            Self::DuplicateReference { reference } => {
                write!(f, "Duplicate transaction reference: {}", reference)
            }
            Self::StaleState { reference } => {
                write!(f, "Transaction {} was modified concurrently", reference)
            }
            Self::NotFound { entity, id } => write!(f, "{} not found: {}", entity, id),
            Self::Forbidden { reason } => write!(f, "Forbidden: {}", reason),
            Self::NotOfflinePayment { reference, gateway } => write!(
                f,
                "Transaction {} uses {} and is confirmed by the gateway",
                reference, gateway
            ),
            Self::MalformedWebhook { reason } => write!(f, "Malformed webhook: {}", reason),
            Self::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl From<DatabaseError> for OrchestratorError {
    fn from(err: DatabaseError) -> Self {
        match err.kind {
            DatabaseErrorKind::NotFound { entity, id } => Self::NotFound { entity, id },
            DatabaseErrorKind::DuplicateReference { reference } => {
                Self::DuplicateReference { reference }
            }
            DatabaseErrorKind::StaleState { reference, .. } => Self::StaleState { reference },
            DatabaseErrorKind::InvalidTransition {
                reference,
                from,
                to,
            } => Self::InvalidTransition {
                reference,
                from,
                to,
            },
            _ => Self::Storage(err),
        }
    }
}

impl From<PaymentError> for OrchestratorError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::ValidationError { message, field } => Self::InvalidRequest {
                field: field.unwrap_or_else(|| "request".to_string()),
                reason: message,
            },
            PaymentError::GatewayUnavailable { gateway, message } => {
                Self::GatewayUnavailable { gateway, message }
            }
            PaymentError::ProviderRejected { gateway, message } => {
                Self::GatewayRejected { gateway, message }
            }
            PaymentError::WebhookVerificationError { message } => {
                Self::MalformedWebhook { reason: message }
            }
        }
    }
}

impl From<PolicyViolation> for OrchestratorError {
    fn from(err: PolicyViolation) -> Self {
        match err {
            PolicyViolation::InvalidAmount { amount, reason } => {
                Self::InvalidAmount { amount, reason }
            }
            PolicyViolation::InsufficientDeposit { required, provided } => {
                Self::InsufficientDeposit { required, provided }
            }
            PolicyViolation::QuoteNotPayable { quote_id, status } => Self::QuoteNotPayable {
                quote_id,
                status: status.to_string(),
            },
        }
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        let kind = match err {
            OrchestratorError::InvalidAmount { amount, reason } => {
                AppErrorKind::Domain(DomainError::InvalidAmount { amount, reason })
            }
            OrchestratorError::InvalidRequest { field, reason } => {
                AppErrorKind::Validation(ValidationError::InvalidField { field, reason })
            }
            OrchestratorError::InsufficientDeposit { required, provided } => {
                AppErrorKind::Domain(DomainError::InsufficientDeposit { required, provided })
            }
            OrchestratorError::QuoteNotPayable { quote_id, status } => {
                AppErrorKind::Domain(DomainError::QuoteNotPayable {
                    quote_id: quote_id.to_string(),
                    status,
                })
            }
            OrchestratorError::GatewayDisabled { gateway } => {
                AppErrorKind::Domain(DomainError::GatewayDisabled {
                    gateway: gateway.to_string(),
                })
            }
            OrchestratorError::GatewayUnavailable { gateway, message } => {
                AppErrorKind::External(ExternalError::GatewayUnavailable { gateway, message })
            }
            OrchestratorError::GatewayRejected { gateway, message } => {
                AppErrorKind::External(ExternalError::GatewayRejected { gateway, message })
            }
            OrchestratorError::InvalidSignature { gateway } => {
                AppErrorKind::Validation(ValidationError::InvalidSignature {
                    reason: format!("signature mismatch for {}", gateway),
                })
            }
            OrchestratorError::InvalidTransition {
                reference,
                from,
                to,
            } => AppErrorKind::Domain(DomainError::InvalidTransition {
                reference,
                from: from.to_string(),
                to: to.to_string(),
            }),
            OrchestratorError::DuplicateReference { reference } => {
                AppErrorKind::Domain(DomainError::DuplicateReference { reference })
            }
            OrchestratorError::StaleState { reference } => {
                AppErrorKind::Domain(DomainError::StaleState { reference })
            }
            OrchestratorError::NotFound { entity, id } if entity == "quote" => {
                AppErrorKind::Domain(DomainError::QuoteNotFound { quote_id: id })
            }
            OrchestratorError::NotFound { id, .. } => {
                AppErrorKind::Domain(DomainError::TransactionNotFound { reference: id })
            }
            OrchestratorError::Forbidden { reason } => {
                AppErrorKind::Domain(DomainError::Forbidden { reason })
            }
            OrchestratorError::NotOfflinePayment { gateway, .. } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "gateway".to_string(),
                    reason: format!("{} payments are confirmed by the gateway", gateway),
                })
            }
            OrchestratorError::MalformedWebhook { reason } => {
                AppErrorKind::Validation(ValidationError::MalformedPayload { reason })
            }
            OrchestratorError::Storage(e) => return AppError::from(e),
        };
        AppError::new(kind)
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

// ============================================================================
// Main Payment Orchestrator
// ============================================================================

/// Payment orchestrator that manages the entire payment lifecycle
pub struct PaymentOrchestrator {
    transactions: Arc<dyn TransactionStore>,
    quotes: Arc<dyn QuoteStore>,
    gateways: GatewayRegistry,
    policy: ReconciliationPolicy,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        quotes: Arc<dyn QuoteStore>,
        gateways: GatewayRegistry,
        policy: ReconciliationPolicy,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            transactions,
            quotes,
            gateways,
            policy,
            config,
        }
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// `QP_<yyyymmdd>_<uuid>`; never reused.
    pub fn generate_reference() -> String {
        format!(
            "QP_{}_{}",
            Utc::now().format("%Y%m%d"),
            Uuid::new_v4().simple()
        )
    }

    fn hosted_provider(
        &self,
        gateway: PaymentGateway,
    ) -> OrchestratorResult<Arc<dyn PaymentProvider>> {
        if !self.gateways.is_enabled(gateway) {
            return Err(OrchestratorError::GatewayDisabled { gateway });
        }
        self.gateways
            .provider(gateway)
            .ok_or(OrchestratorError::GatewayDisabled { gateway })
    }

    fn offline_instructions(&self, gateway: PaymentGateway) -> String {
        match gateway {
            PaymentGateway::Cash => self.config.cash_instructions.clone(),
            _ => self.config.bank_transfer_instructions.clone(),
        }
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Validate, record a `pending` transaction and open a checkout.
    pub async fn initialize_payment(
        &self,
        request: InitializePayment,
    ) -> OrchestratorResult<InitializedPayment> {
        validate_amount(&request.amount)?;

        let provider = if request.gateway.is_hosted() {
            Some(self.hosted_provider(request.gateway)?)
        } else if self.gateways.is_enabled(request.gateway) {
            None
        } else {
            return Err(OrchestratorError::GatewayDisabled {
                gateway: request.gateway,
            });
        };

        let quote = self.quotes.find(request.quote_id).await?;
        if let Some(client_id) = request.client_id {
            if quote.client_id != client_id {
                return Err(OrchestratorError::Forbidden {
                    reason: "quote belongs to another client".to_string(),
                });
            }
        }

        self.policy
            .validate_payment(&quote, request.payment_type, &request.amount)?;

        let currency = if quote.currency.trim().is_empty() {
            self.config.default_currency.clone()
        } else {
            quote.currency.clone()
        };

        let reference = Self::generate_reference();
        let transaction = self
            .transactions
            .create(NewTransaction {
                reference: reference.clone(),
                quote_id: quote.id,
                client_id: quote.client_id,
                amount: request.amount.clone(),
                currency: currency.clone(),
                gateway: request.gateway,
                payment_type: request.payment_type,
                metadata: json!({}),
            })
            .await?;

        info!(
            reference = %reference,
            quote_id = %quote.id,
            gateway = %request.gateway,
            payment_type = %request.payment_type,
            amount = %request.amount,
            "Payment transaction created"
        );

        let Some(provider) = provider else {
            return Ok(InitializedPayment {
                reference,
                authorization_url: None,
                instructions: Some(self.offline_instructions(request.gateway)),
                transaction,
            });
        };

        let init = InitializeRequest {
            reference: reference.clone(),
            amount: Money::new(request.amount.clone(), currency),
            customer_email: quote.client_email.clone(),
            callback_url: request
                .callback_url
                .clone()
                .or_else(|| self.config.callback_url(&reference)),
            metadata: Some(json!({
                "quote_id": quote.id,
                "payment_type": request.payment_type.as_str(),
            })),
        };

        match provider.initialize(init).await {
            Ok(response) => {
                let checkout_meta = json!({
                    "provider_reference": response.provider_reference,
                    "provider_data": response.provider_data,
                });
                let transaction = self
                    .transactions
                    .attach_checkout(&reference, &response.authorization_url, Some(checkout_meta))
                    .await?;

                info!(
                    reference = %reference,
                    gateway = %request.gateway,
                    customer = %mask_email(&quote.client_email),
                    "Checkout opened"
                );

                Ok(InitializedPayment {
                    reference,
                    authorization_url: Some(response.authorization_url),
                    instructions: None,
                    transaction,
                })
            }
            Err(e) => {
                warn!(
                    reference = %reference,
                    gateway = %request.gateway,
                    error = %e,
                    "Gateway initialization failed"
                );
                let fields = TransitionFields {
                    failure_reason: Some(e.to_string()),
                    ..TransitionFields::default()
                };
                if let Err(mark_err) = self
                    .transactions
                    .transition(
                        &reference,
                        TransactionState::Pending,
                        TransactionState::Failed,
                        fields,
                    )
                    .await
                {
                    error!(
                        reference = %reference,
                        error = %mark_err,
                        "Failed to mark transaction failed after gateway error"
                    );
                }
                Err(e.into())
            }
        }
    }

    // =========================================================================
    // Verification & Settlement
    // =========================================================================

    /// Reconcile a transaction with its gateway. Terminal transactions are
    /// returned unchanged, so repeated calls settle at most once.
    pub async fn verify_payment(&self, reference: &str) -> OrchestratorResult<PaymentTransaction> {
        self.verify_payment_with_hint(reference, None).await
    }

    /// Like `verify_payment`, with a gateway transaction id learned from a
    /// webhook.
    pub async fn verify_payment_with_hint(
        &self,
        reference: &str,
        provider_transaction_id: Option<String>,
    ) -> OrchestratorResult<PaymentTransaction> {
        let transaction = self.transactions.find_by_reference(reference).await?;

        if transaction.status.is_terminal() {
            debug!(reference = %reference, status = %transaction.status, "Already terminal");
            return Ok(transaction);
        }
        if !transaction.gateway.is_hosted() {
            // Offline payments wait for an administrator.
            return Ok(transaction);
        }

        let provider = self.hosted_provider(transaction.gateway)?;
        let response = provider
            .verify(VerifyRequest {
                reference: reference.to_string(),
                provider_transaction_id: provider_transaction_id
                    .or_else(|| transaction.gateway_transaction_id.clone()),
            })
            .await?;

        self.apply_verification(transaction, response).await
    }

    async fn apply_verification(
        &self,
        transaction: PaymentTransaction,
        response: VerifyResponse,
    ) -> OrchestratorResult<PaymentTransaction> {
        let reference = transaction.reference.clone();
        let gateway_meta = json!({
            "gateway_response": response.gateway_response,
            "provider_reference": response.provider_reference,
            "verified_at": Utc::now(),
        });

        let (target, fields) = match response.status {
            GatewayPaymentStatus::Pending => {
                debug!(reference = %reference, "Gateway still reports pending");
                return Ok(transaction);
            }
            GatewayPaymentStatus::Success => {
                if !self
                    .policy
                    .currency_matches(&transaction.currency, response.currency.as_deref())
                {
                    let reason = format!(
                        "currency mismatch: expected {}, gateway reported {}",
                        transaction.currency,
                        response.currency.as_deref().unwrap_or_default()
                    );
                    error!(
                        reference = %reference,
                        expected = %transaction.currency,
                        reported = ?response.currency,
                        "Verified currency does not match; failing transaction"
                    );
                    (
                        TransactionState::Failed,
                        TransitionFields {
                            gateway_transaction_id: response.provider_transaction_id.clone(),
                            failure_reason: Some(reason),
                            metadata: Some(gateway_meta),
                            ..TransitionFields::default()
                        },
                    )
                } else {
                    let settlement = self
                        .policy
                        .settle(&transaction.amount, response.amount_paid.as_ref());
                    let mut metadata = gateway_meta;
                    if let Some(discrepancy) = &settlement.discrepancy {
                        warn!(
                            reference = %reference,
                            quote_id = %transaction.quote_id,
                            requested = %transaction.amount,
                            verified = %settlement.amount,
                            discrepancy = %discrepancy,
                            "Verified amount differs from requested; settling verified amount for review"
                        );
                        metadata["amount_discrepancy"] = json!(discrepancy.to_string());
                    }
                    if let Some(unrounded) = &settlement.unrounded {
                        warn!(
                            reference = %reference,
                            unrounded = %unrounded,
                            settled = %settlement.amount,
                            "Verified amount has sub-cent precision; rounded to cents"
                        );
                        metadata["verified_amount_unrounded"] = json!(unrounded.to_string());
                    }
                    (
                        TransactionState::Completed,
                        TransitionFields {
                            gateway_transaction_id: response.provider_transaction_id.clone(),
                            amount_paid: Some(settlement.amount.clone()),
                            paid_at: Some(response.paid_at.unwrap_or_else(Utc::now)),
                            metadata: Some(metadata),
                            quote_adjustment: Some(QuoteAdjustment {
                                quote_id: transaction.quote_id,
                                delta: settlement.amount,
                            }),
                            ..TransitionFields::default()
                        },
                    )
                }
            }
            GatewayPaymentStatus::Failed | GatewayPaymentStatus::Cancelled => {
                let (target, fallback_reason) = if response.status == GatewayPaymentStatus::Failed
                {
                    (TransactionState::Failed, "gateway reported failure")
                } else {
                    (TransactionState::Cancelled, "gateway reported cancellation")
                };
                (
                    target,
                    TransitionFields {
                        gateway_transaction_id: response.provider_transaction_id.clone(),
                        failure_reason: Some(
                            response
                                .gateway_response
                                .clone()
                                .unwrap_or_else(|| fallback_reason.to_string()),
                        ),
                        metadata: Some(gateway_meta),
                        ..TransitionFields::default()
                    },
                )
            }
        };

        match self
            .transactions
            .transition(&reference, TransactionState::Pending, target, fields)
            .await
        {
            Ok(updated) => {
                info!(
                    reference = %reference,
                    quote_id = %updated.quote_id,
                    status = %updated.status,
                    amount_paid = ?updated.amount_paid.as_ref().map(|a| a.to_string()),
                    "Transaction reconciled"
                );
                Ok(updated)
            }
            Err(e) if matches!(e.kind, DatabaseErrorKind::StaleState { .. }) => {
                debug!(reference = %reference, "Lost reconciliation race; returning stored record");
                Ok(self.transactions.find_by_reference(&reference).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Administrative Operations
    // =========================================================================

    /// Refund a completed transaction and take the amount back off the quote.
    ///
    /// The transaction is claimed before the gateway is called, so concurrent
    /// refunds of one reference move money once. Callers that lose the claim
    /// get the stored record back.
    pub async fn refund(
        &self,
        reference: &str,
        amount: Option<BigDecimal>,
    ) -> OrchestratorResult<PaymentTransaction> {
        let transaction = self.transactions.find_by_reference(reference).await?;
        if transaction.status != TransactionState::Completed {
            return Err(OrchestratorError::InvalidTransition {
                reference: reference.to_string(),
                from: transaction.status,
                to: TransactionState::Refunded,
            });
        }

        let refund_amount = self.policy.validate_refund(&transaction, amount.as_ref())?;

        if !self.transactions.claim_refund(reference).await? {
            debug!(reference = %reference, "Refund already in flight; returning stored record");
            return Ok(self.transactions.find_by_reference(reference).await?);
        }

        let refund_meta = if transaction.gateway.is_hosted() {
            match self.request_refund(&transaction, &refund_amount).await {
                Ok(meta) => meta,
                Err(e) => {
                    if let Err(release_err) = self.transactions.release_refund(reference).await {
                        error!(
                            reference = %reference,
                            error = %release_err,
                            "Failed to release refund claim"
                        );
                    }
                    return Err(e);
                }
            }
        } else {
            json!({
                "refund": {
                    "status": "manual",
                    "amount": refund_amount.to_string(),
                    "requested_at": Utc::now(),
                }
            })
        };

        let updated = self
            .transactions
            .transition(
                reference,
                TransactionState::Completed,
                TransactionState::Refunded,
                TransitionFields {
                    refunded_amount: Some(refund_amount.clone()),
                    metadata: Some(refund_meta),
                    quote_adjustment: Some(QuoteAdjustment {
                        quote_id: transaction.quote_id,
                        delta: -refund_amount.clone(),
                    }),
                    ..TransitionFields::default()
                },
            )
            .await
            .map_err(|e| {
                // The claim stays so the accepted refund is never sent twice.
                error!(
                    reference = %reference,
                    error = %e,
                    "Gateway accepted refund but recording it failed"
                );
                e
            })?;

        info!(
            reference = %reference,
            quote_id = %updated.quote_id,
            refunded = %refund_amount,
            "Transaction refunded"
        );
        Ok(updated)
    }

    async fn request_refund(
        &self,
        transaction: &PaymentTransaction,
        refund_amount: &BigDecimal,
    ) -> OrchestratorResult<serde_json::Value> {
        let provider = self.hosted_provider(transaction.gateway)?;
        let response = provider
            .refund(RefundRequest {
                reference: transaction.reference.clone(),
                provider_transaction_id: transaction.gateway_transaction_id.clone(),
                amount: Some(Money::new(
                    refund_amount.clone(),
                    transaction.currency.clone(),
                )),
            })
            .await?;
        if !response.status.is_accepted() {
            return Err(OrchestratorError::GatewayRejected {
                gateway: transaction.gateway.to_string(),
                message: "refund was declined".to_string(),
            });
        }
        Ok(json!({
            "refund": {
                "status": response.status,
                "provider_reference": response.provider_reference,
                "amount": refund_amount.to_string(),
                "requested_at": Utc::now(),
            }
        }))
    }

    /// Settle a bank transfer or cash payment an administrator has seen
    /// arrive. Confirming an already completed transaction is a no-op.
    pub async fn confirm_offline_payment(
        &self,
        reference: &str,
        amount: Option<BigDecimal>,
        confirmed_by: Option<Uuid>,
    ) -> OrchestratorResult<PaymentTransaction> {
        let transaction = self.transactions.find_by_reference(reference).await?;
        if transaction.gateway.is_hosted() {
            return Err(OrchestratorError::NotOfflinePayment {
                reference: reference.to_string(),
                gateway: transaction.gateway,
            });
        }
        match transaction.status {
            TransactionState::Pending => {}
            TransactionState::Completed => return Ok(transaction),
            other => {
                return Err(OrchestratorError::InvalidTransition {
                    reference: reference.to_string(),
                    from: other,
                    to: TransactionState::Completed,
                })
            }
        }

        if let Some(received) = &amount {
            validate_amount(received)?;
        }
        let settlement = self.policy.settle(&transaction.amount, amount.as_ref());
        if let Some(discrepancy) = &settlement.discrepancy {
            warn!(
                reference = %reference,
                requested = %transaction.amount,
                received = %settlement.amount,
                discrepancy = %discrepancy,
                "Confirmed offline amount differs from requested"
            );
        }

        let fields = TransitionFields {
            amount_paid: Some(settlement.amount.clone()),
            paid_at: Some(Utc::now()),
            metadata: Some(json!({
                "confirmed_by": confirmed_by,
                "confirmed_at": Utc::now(),
            })),
            quote_adjustment: Some(QuoteAdjustment {
                quote_id: transaction.quote_id,
                delta: settlement.amount,
            }),
            ..TransitionFields::default()
        };

        match self
            .transactions
            .transition(
                reference,
                TransactionState::Pending,
                TransactionState::Completed,
                fields,
            )
            .await
        {
            Ok(updated) => {
                info!(
                    reference = %reference,
                    quote_id = %updated.quote_id,
                    gateway = %updated.gateway,
                    "Offline payment confirmed"
                );
                Ok(updated)
            }
            Err(e) if matches!(e.kind, DatabaseErrorKind::StaleState { .. }) => {
                let current = self.transactions.find_by_reference(reference).await?;
                if current.status == TransactionState::Completed {
                    Ok(current)
                } else {
                    Err(OrchestratorError::StaleState {
                        reference: reference.to_string(),
                    })
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Expiry
    // =========================================================================

    pub fn expiry_cutoff(&self) -> DateTime<Utc> {
        let expiry = chrono::Duration::from_std(self.config.pending_expiry)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        Utc::now() - expiry
    }

    pub async fn stale_pending(&self, limit: i64) -> OrchestratorResult<Vec<PaymentTransaction>> {
        Ok(self
            .transactions
            .find_stale_pending(self.expiry_cutoff(), limit)
            .await?)
    }

    /// Cancel an expired `pending` transaction. Hosted payments get a last
    /// verification first so a late success is settled rather than dropped;
    /// if the gateway cannot be reached the transaction is left for the next
    /// sweep.
    pub async fn cancel_expired(&self, reference: &str) -> OrchestratorResult<PaymentTransaction> {
        let mut transaction = self.transactions.find_by_reference(reference).await?;
        if transaction.status != TransactionState::Pending {
            return Ok(transaction);
        }

        if transaction.gateway.is_hosted() {
            transaction = self.verify_payment(reference).await?;
            if transaction.status != TransactionState::Pending {
                return Ok(transaction);
            }
        }

        let fields = TransitionFields {
            failure_reason: Some("payment window expired".to_string()),
            ..TransitionFields::default()
        };
        match self
            .transactions
            .transition(
                reference,
                TransactionState::Pending,
                TransactionState::Cancelled,
                fields,
            )
            .await
        {
            Ok(updated) => {
                info!(reference = %reference, gateway = %updated.gateway, "Expired pending transaction cancelled");
                Ok(updated)
            }
            Err(e) if matches!(e.kind, DatabaseErrorKind::StaleState { .. }) => {
                Ok(self.transactions.find_by_reference(reference).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_payment(&self, reference: &str) -> OrchestratorResult<PaymentTransaction> {
        Ok(self.transactions.find_by_reference(reference).await?)
    }

    pub async fn list_payments(
        &self,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> OrchestratorResult<Page<PaymentTransaction>> {
        Ok(self.transactions.list(filter, page).await?)
    }

    pub async fn payments_for_quote(
        &self,
        quote_id: Uuid,
    ) -> OrchestratorResult<Vec<PaymentTransaction>> {
        Ok(self.transactions.list_by_quote(quote_id).await?)
    }
}

// ============================================================================
// Tests
// ============================================================================
