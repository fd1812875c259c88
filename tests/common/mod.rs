//! Shared fixtures: an in-memory store and a scripted hosted gateway.

#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use hmac::{Hmac, Mac};
use quotepay_backend::database::memory::MemoryStore;
use quotepay_backend::database::quote_repository::{Quote, QuoteStatus};
use quotepay_backend::payments::error::{PaymentError, PaymentResult};
use quotepay_backend::payments::factory::GatewayRegistry;
use quotepay_backend::payments::provider::PaymentProvider;
use quotepay_backend::payments::types::{
    GatewayPaymentStatus, InitializeRequest, InitializeResponse, PaymentGateway, RefundRequest,
    RefundResponse, RefundStatus, VerifyRequest, VerifyResponse, WebhookEvent,
};
use quotepay_backend::services::payment_orchestrator::{OrchestratorConfig, PaymentOrchestrator};
use quotepay_backend::services::reconciliation::ReconciliationPolicy;
use quotepay_backend::services::webhook_processor::WebhookProcessor;
use serde_json::{json, Value as JsonValue};
use sha2::Sha512;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "sk_test_scripted";

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

/// What the gateway reports when asked to verify a reference.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub status: GatewayPaymentStatus,
    pub amount_paid: Option<BigDecimal>,
    pub currency: Option<String>,
}

impl Outcome {
    pub fn success(amount: &str) -> Self {
        Self {
            status: GatewayPaymentStatus::Success,
            amount_paid: Some(dec(amount)),
            currency: Some("NGN".to_string()),
        }
    }

    pub fn pending() -> Self {
        Self {
            status: GatewayPaymentStatus::Pending,
            amount_paid: None,
            currency: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            status: GatewayPaymentStatus::Failed,
            amount_paid: None,
            currency: None,
        }
    }
}

/// Hosted gateway double. Unless scripted otherwise, a verified payment
/// succeeds for exactly the amount that was initialized.
#[derive(Default)]
pub struct ScriptedGateway {
    initialized: Mutex<HashMap<String, BigDecimal>>,
    scripted: Mutex<HashMap<String, Outcome>>,
    fail_initialize: AtomicBool,
    unreachable: AtomicBool,
    decline_refunds: AtomicBool,
    refund_delay_ms: AtomicU64,
    pub verify_calls: AtomicUsize,
    pub refund_calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, reference: &str, outcome: Outcome) {
        self.scripted
            .lock()
            .unwrap()
            .insert(reference.to_string(), outcome);
    }

    pub fn fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn decline_refunds(&self, decline: bool) {
        self.decline_refunds.store(decline, Ordering::SeqCst);
    }

    /// Holds every refund call open for `ms` before answering.
    pub fn set_refund_delay(&self, ms: u64) {
        self.refund_delay_ms.store(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentProvider for ScriptedGateway {
    async fn initialize(&self, request: InitializeRequest) -> PaymentResult<InitializeResponse> {
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(PaymentError::unavailable("paystack", "connection reset"));
        }
        self.initialized
            .lock()
            .unwrap()
            .insert(request.reference.clone(), request.amount.amount.clone());
        Ok(InitializeResponse {
            authorization_url: format!("https://checkout.test/{}", request.reference),
            provider_reference: Some(format!("acc_{}", request.reference)),
            provider_data: None,
        })
    }

    async fn verify(&self, request: VerifyRequest) -> PaymentResult<VerifyResponse> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(PaymentError::unavailable("paystack", "timed out"));
        }

        let scripted = self.scripted.lock().unwrap().get(&request.reference).cloned();
        let outcome = match scripted {
            Some(outcome) => outcome,
            None => {
                let amount = self
                    .initialized
                    .lock()
                    .unwrap()
                    .get(&request.reference)
                    .cloned()
                    .ok_or_else(|| PaymentError::rejected("paystack", "Transaction reference not found"))?;
                Outcome {
                    status: GatewayPaymentStatus::Success,
                    amount_paid: Some(amount),
                    currency: Some("NGN".to_string()),
                }
            }
        };

        Ok(VerifyResponse {
            status: outcome.status,
            reference: request.reference.clone(),
            amount_paid: outcome.amount_paid,
            currency: outcome.currency,
            provider_reference: None,
            provider_transaction_id: Some(format!("gw_{}", request.reference)),
            paid_at: None,
            gateway_response: None,
            raw_payload: json!({}),
        })
    }

    async fn refund(&self, _request: RefundRequest) -> PaymentResult<RefundResponse> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.refund_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        Ok(RefundResponse {
            status: if self.decline_refunds.load(Ordering::SeqCst) {
                RefundStatus::Failed
            } else {
                RefundStatus::Pending
            },
            provider_reference: Some("rfnd_1".to_string()),
            raw_payload: json!({}),
        })
    }

    fn name(&self) -> PaymentGateway {
        PaymentGateway::Paystack
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        !signature.is_empty() && sign(payload) == signature
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload).map_err(|e| {
            PaymentError::WebhookVerificationError {
                message: e.to_string(),
            }
        })?;
        let data = &parsed["data"];
        Ok(WebhookEvent {
            gateway: PaymentGateway::Paystack,
            event_type: parsed["event"].as_str().unwrap_or_default().to_string(),
            event_id: data["id"].to_string(),
            reference: data["reference"].as_str().map(str::to_string),
            provider_transaction_id: None,
            status: None,
            payload: parsed.clone(),
            received_at: Utc::now(),
        })
    }
}

/// HMAC-SHA512 hex, the way Paystack signs webhook bodies.
pub fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha512>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub fn charge_success_body(event_id: u64, reference: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event": "charge.success",
        "data": { "id": event_id, "reference": reference, "status": "success" }
    }))
    .unwrap()
}

pub struct Harness {
    pub store: MemoryStore,
    pub gateway: Arc<ScriptedGateway>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub webhooks: Arc<WebhookProcessor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let store = MemoryStore::new();
        let gateway = ScriptedGateway::new();
        Self::over(store, gateway, config)
    }

    /// Another orchestrator over the same store and gateway.
    pub fn over(
        store: MemoryStore,
        gateway: Arc<ScriptedGateway>,
        config: OrchestratorConfig,
    ) -> Self {
        let registry = GatewayRegistry::new(vec![PaymentGateway::BankTransfer, PaymentGateway::Cash])
            .with_provider(gateway.clone());
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            registry,
            ReconciliationPolicy::default(),
            config,
        ));
        let webhooks = Arc::new(WebhookProcessor::new(
            Arc::new(store.clone()),
            orchestrator.clone(),
        ));
        Self {
            store,
            gateway,
            orchestrator,
            webhooks,
        }
    }

    pub async fn approved_quote(&self, total: &str) -> Quote {
        let quote = Quote {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            client_email: "client@example.com".to_string(),
            total_amount: dec(total),
            paid_amount: dec("0"),
            currency: "NGN".to_string(),
            status: QuoteStatus::Approved,
            updated_at: Utc::now(),
        };
        self.store.insert_quote(quote.clone()).await;
        quote
    }

    pub async fn quote(&self, id: Uuid) -> Quote {
        use quotepay_backend::database::repository::QuoteStore;
        self.store.find(id).await.unwrap()
    }
}
