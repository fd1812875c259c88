//! Services module for payment business logic

pub mod payment_orchestrator;
pub mod reconciliation;
pub mod webhook_processor;

// Re-export orchestrator types
pub use crate::services::payment_orchestrator::{
    InitializePayment, InitializedPayment, OrchestratorConfig, OrchestratorError,
    OrchestratorResult, PaymentOrchestrator,
};
pub use crate::services::reconciliation::{PolicyViolation, ReconciliationPolicy, Settlement};
pub use crate::services::webhook_processor::{
    WebhookOutcome, WebhookProcessor, WebhookProcessorError,
};
