use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    GatewayPaymentStatus, InitializeRequest, InitializeResponse, PaymentGateway, RefundRequest,
    RefundResponse, RefundStatus, VerifyRequest, VerifyResponse, WebhookEvent,
};
use crate::payments::utils::{
    from_minor_units, to_minor_units, verify_hmac_sha512_hex, HttpPolicy, PaymentHttpClient,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::info;

const GATEWAY: &str = "paystack";

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    /// Falls back to the secret key, which is what Paystack signs with.
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub http: HttpPolicy,
}

impl Default for PaystackConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: None,
            base_url: "https://api.paystack.co".to_string(),
            http: HttpPolicy::default(),
        }
    }
}

impl PaystackConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let secret_key = std::env::var("PAYSTACK_SECRET_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(PaymentError::ValidationError {
                message: "PAYSTACK_SECRET_KEY environment variable is required".to_string(),
                field: Some("PAYSTACK_SECRET_KEY".to_string()),
            })?;

        Ok(Self {
            webhook_secret: std::env::var("PAYSTACK_WEBHOOK_SECRET")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            base_url: std::env::var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
            http: HttpPolicy::from_env(),
            secret_key,
        })
    }
}

pub struct PaystackProvider {
    config: PaystackConfig,
    http: PaymentHttpClient,
}

impl PaystackProvider {
    pub fn new(config: PaystackConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(GATEWAY, config.http.clone())?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(PaystackConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn unwrap_envelope<T>(raw: PaystackEnvelope<T>) -> PaymentResult<T> {
        if !raw.status {
            return Err(PaymentError::rejected(GATEWAY, raw.message));
        }
        raw.data
            .ok_or_else(|| PaymentError::unavailable(GATEWAY, "response is missing data"))
    }

    pub(crate) fn map_status(status: &str) -> GatewayPaymentStatus {
        match status {
            "success" => GatewayPaymentStatus::Success,
            "failed" | "reversed" => GatewayPaymentStatus::Failed,
            "abandoned" | "pending" | "ongoing" | "processing" | "queued" => {
                GatewayPaymentStatus::Pending
            }
            _ => GatewayPaymentStatus::Pending,
        }
    }

    fn map_refund_status(status: &str) -> RefundStatus {
        match status {
            "processed" => RefundStatus::Processed,
            "failed" => RefundStatus::Failed,
            _ => RefundStatus::Pending,
        }
    }
}

#[async_trait]
impl PaymentProvider for PaystackProvider {
    async fn initialize(&self, request: InitializeRequest) -> PaymentResult<InitializeResponse> {
        request.amount.validate_positive("amount")?;
        if request.customer_email.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "customer email is required for paystack initialization".to_string(),
                field: Some("customer_email".to_string()),
            });
        }

        let payload = serde_json::json!({
            "email": request.customer_email,
            "amount": to_minor_units(&request.amount.amount)?,
            "currency": request.amount.currency,
            "reference": request.reference,
            "callback_url": request.callback_url,
            "metadata": request.metadata,
        });

        let raw: PaystackEnvelope<PaystackInitializeData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/transaction/initialize"),
                &self.config.secret_key,
                Some(&payload),
            )
            .await?;
        let data = Self::unwrap_envelope(raw)?;
        info!(reference = %data.reference, "paystack payment initialized");

        Ok(InitializeResponse {
            authorization_url: data.authorization_url,
            provider_reference: Some(data.reference),
            provider_data: Some(serde_json::json!({ "access_code": data.access_code })),
        })
    }

    async fn verify(&self, request: VerifyRequest) -> PaymentResult<VerifyResponse> {
        if request.reference.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "reference is required".to_string(),
                field: Some("reference".to_string()),
            });
        }

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/transaction/verify/{}", request.reference)),
                &self.config.secret_key,
                None,
            )
            .await?;
        let envelope: PaystackEnvelope<PaystackVerifyData> =
            serde_json::from_value(raw.clone()).map_err(|e| {
                PaymentError::unavailable(GATEWAY, format!("invalid verify payload: {}", e))
            })?;
        let data = Self::unwrap_envelope(envelope)?;

        if data.reference != request.reference {
            return Err(PaymentError::rejected(
                GATEWAY,
                format!(
                    "verify returned reference {} for {}",
                    data.reference, request.reference
                ),
            ));
        }

        Ok(VerifyResponse {
            status: Self::map_status(&data.status),
            reference: data.reference.clone(),
            amount_paid: Some(from_minor_units(data.amount)),
            currency: Some(data.currency),
            provider_reference: Some(data.reference),
            provider_transaction_id: data.id.map(|id| id.to_string()),
            paid_at: data
                .paid_at
                .as_deref()
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|v| v.with_timezone(&Utc)),
            gateway_response: data.gateway_response,
            raw_payload: raw,
        })
    }

    async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        let mut payload = serde_json::json!({
            "transaction": request
                .provider_transaction_id
                .clone()
                .unwrap_or_else(|| request.reference.clone()),
        });
        if let Some(amount) = &request.amount {
            amount.validate_positive("amount")?;
            payload["amount"] = serde_json::json!(to_minor_units(&amount.amount)?);
            payload["currency"] = serde_json::json!(amount.currency);
        }

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/refund"),
                &self.config.secret_key,
                Some(&payload),
            )
            .await?;
        let envelope: PaystackEnvelope<PaystackRefundData> = serde_json::from_value(raw.clone())
            .map_err(|e| {
                PaymentError::unavailable(GATEWAY, format!("invalid refund payload: {}", e))
            })?;
        let data = Self::unwrap_envelope(envelope)?;
        info!(reference = %request.reference, status = %data.status, "paystack refund requested");

        Ok(RefundResponse {
            status: Self::map_refund_status(&data.status),
            provider_reference: data.id.map(|id| id.to_string()),
            raw_payload: raw,
        })
    }

    fn name(&self) -> PaymentGateway {
        PaymentGateway::Paystack
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        let secret = self
            .config
            .webhook_secret
            .as_deref()
            .unwrap_or(&self.config.secret_key);
        verify_hmac_sha512_hex(payload, secret, signature)
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload).map_err(|e| {
            PaymentError::WebhookVerificationError {
                message: format!("invalid webhook JSON payload: {}", e),
            }
        })?;

        let event_type = parsed
            .get("event")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let data = parsed.get("data");
        let reference = data
            .and_then(|v| v.get("reference"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        let provider_transaction_id = data.and_then(|v| v.get("id")).and_then(json_id);
        let status = data
            .and_then(|v| v.get("status"))
            .and_then(|v| v.as_str())
            .map(Self::map_status);

        let event_id = provider_transaction_id
            .clone()
            .map(|id| format!("{}:{}", event_type, id))
            .or_else(|| reference.as_ref().map(|r| format!("{}:{}", event_type, r)))
            .ok_or(PaymentError::WebhookVerificationError {
                message: "webhook payload carries neither id nor reference".to_string(),
            })?;

        Ok(WebhookEvent {
            gateway: PaymentGateway::Paystack,
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

#[derive(Debug, Deserialize)]
struct PaystackEnvelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct PaystackInitializeData {
    authorization_url: String,
    access_code: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct PaystackVerifyData {
    #[serde(default)]
    id: Option<i64>,
    reference: String,
    amount: i64,
    currency: String,
    status: String,
    #[serde(default, alias = "paidAt")]
    paid_at: Option<String>,
    #[serde(default)]
    gateway_response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaystackRefundData {
    #[serde(default)]
    id: Option<i64>,
    status: String,
}
