use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::database::error::DatabaseError;
use crate::database::repository::WebhookEventStore;
use crate::database::webhook_repository::{NewWebhookEvent, WebhookEventStatus};
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::payments::types::{PaymentGateway, TransactionState};
use crate::services::payment_orchestrator::{OrchestratorError, PaymentOrchestrator};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature from {gateway}")]
    InvalidSignature { gateway: PaymentGateway },
    #[error("Gateway not enabled: {0}")]
    GatewayDisabled(PaymentGateway),
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Processing error: {0}")]
    Processing(#[from] OrchestratorError),
}

impl From<WebhookProcessorError> for AppError {
    fn from(err: WebhookProcessorError) -> Self {
        match err {
            WebhookProcessorError::InvalidSignature { gateway } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidSignature {
                    reason: format!("signature mismatch for {}", gateway),
                }))
            }
            WebhookProcessorError::GatewayDisabled(gateway) => {
                AppError::new(AppErrorKind::Domain(DomainError::GatewayDisabled {
                    gateway: gateway.to_string(),
                }))
            }
            WebhookProcessorError::MalformedPayload(reason) => {
                AppError::new(AppErrorKind::Validation(ValidationError::MalformedPayload {
                    reason,
                }))
            }
            WebhookProcessorError::Database(e) => e.into(),
            WebhookProcessorError::Processing(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Reconciled against the gateway.
    Processed {
        reference: String,
        status: TransactionState,
    },
    /// Redelivery of an event that was already processed.
    Duplicate { event_id: String },
    /// Logged but not a charge event.
    Ignored { event_type: String },
    /// Gateway still reports the charge as pending. The event stays
    /// retryable so a later check can settle it.
    Deferred { reference: String },
}

const STILL_PENDING: &str = "gateway still reports pending";

/// Turns gateway notifications into verifications. A webhook is only ever a
/// hint: the orchestrator re-verifies with the gateway before settling.
pub struct WebhookProcessor {
    events: Arc<dyn WebhookEventStore>,
    orchestrator: Arc<PaymentOrchestrator>,
}

impl WebhookProcessor {
    pub fn new(events: Arc<dyn WebhookEventStore>, orchestrator: Arc<PaymentOrchestrator>) -> Self {
        Self {
            events,
            orchestrator,
        }
    }

    pub async fn process_webhook(
        &self,
        gateway: PaymentGateway,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let provider = self
            .orchestrator
            .gateways()
            .provider(gateway)
            .ok_or(WebhookProcessorError::GatewayDisabled(gateway))?;

        // Nothing is parsed or stored until the signature checks out.
        let signature = signature.unwrap_or_default();
        if !provider.verify_webhook_signature(body, signature) {
            warn!(gateway = %gateway, "Rejected webhook with invalid signature");
            return Err(WebhookProcessorError::InvalidSignature { gateway });
        }

        let event = provider
            .parse_webhook_event(body)
            .map_err(|e| WebhookProcessorError::MalformedPayload(e.to_string()))?;

        let recorded = self
            .events
            .record(NewWebhookEvent {
                gateway: gateway.as_str().to_string(),
                event_id: event.event_id.clone(),
                event_type: event.event_type.clone(),
                reference: event.reference.clone(),
                payload: event.payload.clone(),
            })
            .await?;

        if recorded.record.status == WebhookEventStatus::Processed {
            info!(
                gateway = %gateway,
                event_id = %event.event_id,
                deliveries = recorded.record.delivery_count,
                "Webhook already processed"
            );
            return Ok(WebhookOutcome::Duplicate {
                event_id: event.event_id,
            });
        }

        let reference = match (&event.reference, event.is_charge_event()) {
            (Some(reference), true) => reference.clone(),
            _ => {
                info!(
                    gateway = %gateway,
                    event_type = %event.event_type,
                    "Ignoring non-charge webhook"
                );
                self.events.mark_processed(recorded.record.id).await?;
                return Ok(WebhookOutcome::Ignored {
                    event_type: event.event_type,
                });
            }
        };

        match self
            .orchestrator
            .verify_payment_with_hint(&reference, event.provider_transaction_id.clone())
            .await
        {
            Ok(transaction) if transaction.status == TransactionState::Pending => {
                info!(
                    gateway = %gateway,
                    event_id = %event.event_id,
                    reference = %reference,
                    "Gateway still reports pending; webhook kept for retry"
                );
                self.events
                    .mark_failed(recorded.record.id, STILL_PENDING)
                    .await?;
                Ok(WebhookOutcome::Deferred { reference })
            }
            Ok(transaction) => {
                self.events.mark_processed(recorded.record.id).await?;
                info!(
                    gateway = %gateway,
                    event_id = %event.event_id,
                    reference = %reference,
                    status = %transaction.status,
                    "Webhook processed"
                );
                Ok(WebhookOutcome::Processed {
                    reference,
                    status: transaction.status,
                })
            }
            Err(e) => {
                warn!(
                    gateway = %gateway,
                    event_id = %event.event_id,
                    reference = %reference,
                    error = %e,
                    "Webhook processing failed"
                );
                self.events
                    .mark_failed(recorded.record.id, &e.to_string())
                    .await?;
                Err(e.into())
            }
        }
    }

    /// Re-runs verification for logged events whose processing failed.
    /// Called by the background worker.
    pub async fn retry_failed(
        &self,
        max_attempts: i32,
        batch_size: i64,
    ) -> Result<usize, WebhookProcessorError> {
        let failed = self.events.retryable(max_attempts, batch_size).await?;

        let mut processed = 0;
        for event in failed {
            let Some(reference) = event.reference.as_deref() else {
                self.events.mark_processed(event.id).await?;
                continue;
            };

            match self.orchestrator.verify_payment(reference).await {
                Ok(transaction) if transaction.status == TransactionState::Pending => {
                    debug!(
                        event_id = %event.event_id,
                        reference = %reference,
                        attempts = event.attempts + 1,
                        "Webhook retry found payment still pending"
                    );
                    self.events.mark_failed(event.id, STILL_PENDING).await?;
                }
                Ok(transaction) => {
                    self.events.mark_processed(event.id).await?;
                    info!(
                        event_id = %event.event_id,
                        reference = %reference,
                        status = %transaction.status,
                        attempts = event.attempts + 1,
                        "Webhook retry succeeded"
                    );
                    processed += 1;
                }
                Err(e) => {
                    error!(
                        event_id = %event.event_id,
                        reference = %reference,
                        attempts = event.attempts + 1,
                        error = %e,
                        "Webhook retry failed"
                    );
                    self.events.mark_failed(event.id, &e.to_string()).await?;
                }
            }
        }

        Ok(processed)
    }
}
