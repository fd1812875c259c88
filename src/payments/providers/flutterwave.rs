use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    GatewayPaymentStatus, InitializeRequest, InitializeResponse, PaymentGateway, RefundRequest,
    RefundResponse, RefundStatus, VerifyRequest, VerifyResponse, WebhookEvent,
};
use crate::payments::utils::{
    json_decimal, major_units_json, secure_eq, verify_hmac_sha256_base64, HttpPolicy,
    PaymentHttpClient,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

const GATEWAY: &str = "flutterwave";

#[derive(Debug, Clone)]
pub struct FlutterwaveConfig {
    pub secret_key: String,
    /// Key for the HMAC-SHA256 signature sent in `flutterwave-signature`.
    pub webhook_secret: Option<String>,
    /// Static dashboard hash sent in `verif-hash` by older integrations.
    pub secret_hash: Option<String>,
    pub allow_legacy_hash: bool,
    pub base_url: String,
    pub http: HttpPolicy,
}

impl Default for FlutterwaveConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: None,
            secret_hash: None,
            allow_legacy_hash: false,
            base_url: "https://api.flutterwave.com/v3".to_string(),
            http: HttpPolicy::default(),
        }
    }
}

impl FlutterwaveConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let secret_key = std::env::var("FLUTTERWAVE_SECRET_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(PaymentError::ValidationError {
                message: "FLUTTERWAVE_SECRET_KEY environment variable is required".to_string(),
                field: Some("FLUTTERWAVE_SECRET_KEY".to_string()),
            })?;

        Ok(Self {
            secret_key,
            webhook_secret: std::env::var("FLUTTERWAVE_WEBHOOK_SECRET")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            secret_hash: std::env::var("FLUTTERWAVE_WEBHOOK_HASH")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            allow_legacy_hash: std::env::var("FLUTTERWAVE_ALLOW_LEGACY_HASH")
                .ok()
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            base_url: std::env::var("FLUTTERWAVE_BASE_URL")
                .unwrap_or_else(|_| "https://api.flutterwave.com/v3".to_string()),
            http: HttpPolicy::from_env(),
        })
    }
}

pub struct FlutterwaveProvider {
    config: FlutterwaveConfig,
    http: PaymentHttpClient,
}

impl FlutterwaveProvider {
    pub fn new(config: FlutterwaveConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(GATEWAY, config.http.clone())?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(FlutterwaveConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn ensure_success(raw: &FlutterwaveEnvelope) -> PaymentResult<JsonValue> {
        if !raw.status.eq_ignore_ascii_case("success") {
            return Err(PaymentError::rejected(GATEWAY, raw.message.clone()));
        }
        raw.data
            .clone()
            .ok_or_else(|| PaymentError::unavailable(GATEWAY, "response is missing data"))
    }

    pub(crate) fn map_status(status: &str) -> GatewayPaymentStatus {
        match status.to_lowercase().as_str() {
            "successful" | "success" | "completed" => GatewayPaymentStatus::Success,
            "failed" | "error" => GatewayPaymentStatus::Failed,
            "cancelled" => GatewayPaymentStatus::Cancelled,
            "pending" | "new" | "processing" => GatewayPaymentStatus::Pending,
            _ => GatewayPaymentStatus::Pending,
        }
    }

    fn map_refund_status(status: &str) -> RefundStatus {
        match status.to_lowercase().as_str() {
            "completed" | "successful" => RefundStatus::Processed,
            "failed" => RefundStatus::Failed,
            _ => RefundStatus::Pending,
        }
    }
}

#[async_trait]
impl PaymentProvider for FlutterwaveProvider {
    async fn initialize(&self, request: InitializeRequest) -> PaymentResult<InitializeResponse> {
        request.amount.validate_positive("amount")?;
        if request.reference.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "reference is required".to_string(),
                field: Some("reference".to_string()),
            });
        }
        if request.customer_email.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "customer email is required for flutterwave initialization".to_string(),
                field: Some("customer_email".to_string()),
            });
        }

        let payload = serde_json::json!({
            "tx_ref": request.reference,
            "amount": major_units_json(&request.amount.amount),
            "currency": request.amount.currency,
            "redirect_url": request.callback_url,
            "customer": {
                "email": request.customer_email,
            },
            "meta": request.metadata,
        });

        let raw: FlutterwaveEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/payments"),
                &self.config.secret_key,
                Some(&payload),
            )
            .await?;
        let data = Self::ensure_success(&raw)?;

        let payment_link = data
            .get("link")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .ok_or_else(|| {
                PaymentError::unavailable(GATEWAY, "missing payment link in flutterwave response")
            })?;

        info!(tx_ref = %request.reference, "flutterwave payment initialized");

        Ok(InitializeResponse {
            authorization_url: payment_link,
            provider_reference: Some(request.reference),
            provider_data: Some(data),
        })
    }

    async fn verify(&self, request: VerifyRequest) -> PaymentResult<VerifyResponse> {
        let url = match request
            .provider_transaction_id
            .as_deref()
            .filter(|v| !v.trim().is_empty())
        {
            Some(id) => self.endpoint(&format!("/transactions/{}/verify", id)),
            None => {
                if request.reference.trim().is_empty() {
                    return Err(PaymentError::ValidationError {
                        message: "reference is required".to_string(),
                        field: Some("reference".to_string()),
                    });
                }
                format!(
                    "{}?tx_ref={}",
                    self.endpoint("/transactions/verify_by_reference"),
                    request.reference
                )
            }
        };

        let raw: FlutterwaveEnvelope = self
            .http
            .request_json(reqwest::Method::GET, &url, &self.config.secret_key, None)
            .await?;
        let data = Self::ensure_success(&raw)?;

        let tx_ref = data
            .get("tx_ref")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if tx_ref != request.reference {
            return Err(PaymentError::rejected(
                GATEWAY,
                format!(
                    "verify returned tx_ref {} for {}",
                    tx_ref, request.reference
                ),
            ));
        }

        let status = data
            .get("status")
            .and_then(|v| v.as_str())
            .map(Self::map_status)
            .unwrap_or(GatewayPaymentStatus::Pending);

        Ok(VerifyResponse {
            status,
            reference: request.reference.clone(),
            amount_paid: data.get("amount").and_then(json_decimal),
            currency: data
                .get("currency")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            provider_reference: data
                .get("flw_ref")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            provider_transaction_id: data.get("id").and_then(json_id),
            paid_at: data
                .get("created_at")
                .and_then(|v| v.as_str())
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|v| v.with_timezone(&Utc)),
            gateway_response: data
                .get("processor_response")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            raw_payload: serde_json::to_value(&raw).unwrap_or(data),
        })
    }

    async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        let id = request
            .provider_transaction_id
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or(PaymentError::ValidationError {
                message: "flutterwave refunds require the gateway transaction id".to_string(),
                field: Some("provider_transaction_id".to_string()),
            })?;

        let payload = match &request.amount {
            Some(amount) => {
                amount.validate_positive("amount")?;
                serde_json::json!({ "amount": major_units_json(&amount.amount) })
            }
            None => serde_json::json!({}),
        };

        let raw: FlutterwaveEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/transactions/{}/refund", id)),
                &self.config.secret_key,
                Some(&payload),
            )
            .await?;
        let data = Self::ensure_success(&raw)?;
        let status = data
            .get("status")
            .and_then(|v| v.as_str())
            .map(Self::map_refund_status)
            .unwrap_or(RefundStatus::Pending);
        info!(tx_ref = %request.reference, ?status, "flutterwave refund requested");

        Ok(RefundResponse {
            status,
            provider_reference: data.get("id").and_then(json_id),
            raw_payload: data,
        })
    }

    fn name(&self) -> PaymentGateway {
        PaymentGateway::Flutterwave
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        if let Some(secret) = self.config.webhook_secret.as_deref() {
            if verify_hmac_sha256_base64(payload, secret, signature) {
                return true;
            }
        }

        if !self.config.allow_legacy_hash {
            return false;
        }
        match self.config.secret_hash.as_deref() {
            Some(hash) if !hash.trim().is_empty() && !signature.trim().is_empty() => {
                let valid = secure_eq(hash.trim().as_bytes(), signature.trim().as_bytes());
                if valid {
                    warn!("flutterwave webhook accepted via legacy static hash");
                }
                valid
            }
            _ => false,
        }
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue =
            serde_json::from_slice(payload).map_err(|e| PaymentError::WebhookVerificationError {
                message: format!("invalid webhook JSON payload: {}", e),
            })?;

        let event_type = parsed
            .get("event")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let data = parsed
            .get("data")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        let status = data
            .get("status")
            .and_then(|v| v.as_str())
            .map(Self::map_status);
        let reference = data
            .get("tx_ref")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let provider_transaction_id = data.get("id").and_then(json_id);

        let event_id = provider_transaction_id
            .clone()
            .map(|id| format!("{}:{}", event_type, id))
            .or_else(|| reference.as_ref().map(|r| format!("{}:{}", event_type, r)))
            .ok_or(PaymentError::WebhookVerificationError {
                message: "webhook payload carries neither id nor tx_ref".to_string(),
            })?;

        Ok(WebhookEvent {
            gateway: PaymentGateway::Flutterwave,
            event_type,
            event_id,
            reference,
            provider_transaction_id,
            status,
            payload: parsed,
            received_at: Utc::now(),
        })
    }
}

fn json_id(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct FlutterwaveEnvelope {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<JsonValue>,
}
