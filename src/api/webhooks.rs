use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::str::FromStr;
use tracing::{error, info, warn};

use crate::api::AppState;
use crate::payments::types::PaymentGateway;
use crate::services::webhook_processor::{WebhookOutcome, WebhookProcessorError};

/// Header carrying the gateway's signature over the raw body.
fn signature_header(gateway: PaymentGateway, headers: &HeaderMap) -> Option<String> {
    let names: &[&str] = match gateway {
        PaymentGateway::Paystack => &["x-paystack-signature"],
        // HMAC header first; verif-hash is the legacy static secret.
        PaymentGateway::Flutterwave => &["flutterwave-signature", "verif-hash"],
        _ => &[],
    };
    names.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    })
}

/// POST /api/webhooks/{gateway}
///
/// Known gateways always get a 200 so they stop redelivering; the outcome is
/// only logged. The body is kept as raw bytes because signatures are computed
/// over the exact payload.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let gateway = match PaymentGateway::from_str(&gateway) {
        Ok(g) if g.is_hosted() => g,
        _ => {
            warn!(gateway = %gateway, "Webhook for unknown gateway");
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "status": "error", "message": "unknown gateway" })),
            )
                .into_response();
        }
    };

    info!(gateway = %gateway, bytes = body.len(), "Received webhook");

    let signature = signature_header(gateway, &headers);
    if signature.is_none() {
        warn!(gateway = %gateway, "Webhook without signature header");
    }

    match state
        .webhooks
        .process_webhook(gateway, signature.as_deref(), &body)
        .await
    {
        Ok(WebhookOutcome::Processed { reference, status }) => {
            info!(gateway = %gateway, reference = %reference, status = %status, "Webhook reconciled");
        }
        Ok(WebhookOutcome::Duplicate { event_id }) => {
            info!(gateway = %gateway, event_id = %event_id, "Duplicate webhook acknowledged");
        }
        Ok(WebhookOutcome::Ignored { event_type }) => {
            info!(gateway = %gateway, event_type = %event_type, "Webhook ignored");
        }
        Ok(WebhookOutcome::Deferred { reference }) => {
            info!(gateway = %gateway, reference = %reference, "Webhook deferred, payment still pending");
        }
        Err(WebhookProcessorError::InvalidSignature { .. }) => {
            warn!(gateway = %gateway, "Webhook rejected: invalid signature");
        }
        Err(e @ WebhookProcessorError::GatewayDisabled(_)) => {
            warn!(gateway = %gateway, error = %e, "Webhook for disabled gateway");
        }
        Err(e) => {
            error!(gateway = %gateway, error = %e, "Webhook processing failed, queued for retry");
        }
    }

    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flutterwave_prefers_hmac_header() {
        let mut headers = HeaderMap::new();
        headers.insert("verif-hash", "legacy".parse().unwrap());
        assert_eq!(
            signature_header(PaymentGateway::Flutterwave, &headers).as_deref(),
            Some("legacy")
        );

        headers.insert("flutterwave-signature", "hmac".parse().unwrap());
        assert_eq!(
            signature_header(PaymentGateway::Flutterwave, &headers).as_deref(),
            Some("hmac")
        );
    }

    #[test]
    fn paystack_ignores_other_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("verif-hash", "legacy".parse().unwrap());
        assert_eq!(signature_header(PaymentGateway::Paystack, &headers), None);

        headers.insert("x-paystack-signature", "abc".parse().unwrap());
        assert_eq!(
            signature_header(PaymentGateway::Paystack, &headers).as_deref(),
            Some("abc")
        );
    }
}
