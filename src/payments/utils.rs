use crate::payments::error::{PaymentError, PaymentResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bigdecimal::{BigDecimal, ToPrimitive};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Retry and timeout knobs shared by every hosted gateway client.
#[derive(Debug, Clone)]
pub struct HttpPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for HttpPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl HttpPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout: std::env::var("PAYMENT_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_attempts: std::env::var("PAYMENT_HTTP_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_attempts),
            base_delay: std::env::var("PAYMENT_HTTP_RETRY_BASE_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
        }
    }
}

#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    gateway: &'static str,
    policy: HttpPolicy,
}

impl PaymentHttpClient {
    pub fn new(gateway: &'static str, policy: HttpPolicy) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(policy.timeout)
            .build()
            .map_err(|e| {
                PaymentError::unavailable(gateway, format!("failed to initialize HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            gateway,
            policy,
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.policy.base_delay * 2_u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Sends a JSON request, retrying transport failures, 429 and 5xx with
    /// exponential backoff. Other 4xx answers come back as rejections.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: &str,
        body: Option<&JsonValue>,
    ) -> PaymentResult<T> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let mut request = self
                .client
                .request(method.clone(), url)
                .timeout(self.policy.timeout)
                .bearer_auth(bearer_token);
            if let Some(payload) = body {
                request = request.json(payload);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            PaymentError::unavailable(
                                self.gateway,
                                format!("invalid gateway JSON response: {}", e),
                            )
                        });
                    }

                    let message = format!("HTTP {}: {}", status, truncate(&text, 256));
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    let error = if retryable {
                        PaymentError::unavailable(self.gateway, message)
                    } else {
                        PaymentError::rejected(self.gateway, message)
                    };
                    if retryable && attempt < max_attempts {
                        warn!(
                            gateway = self.gateway,
                            status = %status,
                            attempt,
                            "gateway returned retryable status, retrying"
                        );
                        tokio::time::sleep(self.backoff(attempt)).await;
                        last_error = Some(error);
                        continue;
                    }
                    return Err(error);
                }
                Err(e) => {
                    warn!(
                        gateway = self.gateway,
                        attempt,
                        error = %e,
                        "gateway request failed"
                    );
                    last_error = Some(PaymentError::unavailable(
                        self.gateway,
                        format!("gateway request failed: {}", e),
                    ));
                    if attempt < max_attempts {
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| PaymentError::unavailable(self.gateway, "gateway request failed")))
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn verify_hmac_sha512_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    type HmacSha512 = Hmac<Sha512>;
    if secret.is_empty() || signature.trim().is_empty() {
        return false;
    }
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    mac.update(payload);
    let computed = hex::encode(mac.finalize().into_bytes());
    secure_eq(
        computed.as_bytes(),
        signature.trim().to_ascii_lowercase().as_bytes(),
    )
}

pub fn verify_hmac_sha256_base64(payload: &[u8], secret: &str, signature: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    if secret.is_empty() || signature.trim().is_empty() {
        return false;
    }
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    mac.update(payload);
    let computed = BASE64.encode(mac.finalize().into_bytes());
    secure_eq(computed.as_bytes(), signature.trim().as_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Converts a major-unit amount to minor units (kobo). Sub-minor precision is
/// rejected rather than rounded.
pub fn to_minor_units(amount: &BigDecimal) -> PaymentResult<i64> {
    let scaled = amount * BigDecimal::from(100);
    if scaled.with_scale(0) != scaled {
        return Err(PaymentError::ValidationError {
            message: format!("amount {} has more than two decimal places", amount),
            field: Some("amount".to_string()),
        });
    }
    scaled.to_i64().ok_or_else(|| PaymentError::ValidationError {
        message: format!("amount {} is out of range", amount),
        field: Some("amount".to_string()),
    })
}

pub fn from_minor_units(minor: i64) -> BigDecimal {
    BigDecimal::new(minor.into(), 2)
}

/// Reads a decimal out of a JSON number or numeric string without passing
/// through `f64`.
pub fn json_decimal(value: &JsonValue) -> Option<BigDecimal> {
    match value {
        JsonValue::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        JsonValue::String(s) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Renders an amount for a gateway that takes major units as a JSON number.
pub fn major_units_json(amount: &BigDecimal) -> JsonValue {
    let rendered = amount.with_scale(2).to_string();
    serde_json::from_str::<serde_json::Number>(&rendered)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::String(rendered))
}
