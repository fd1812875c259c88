use crate::payments::error::PaymentResult;
use crate::payments::types::{
    InitializeRequest, InitializeResponse, PaymentGateway, RefundRequest, RefundResponse,
    VerifyRequest, VerifyResponse, WebhookEvent,
};
use async_trait::async_trait;

/// A hosted payment gateway.
///
/// Implementations are stateless adapters: they translate domain requests into
/// provider HTTP calls and normalize the answers. They never touch storage.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn initialize(&self, request: InitializeRequest) -> PaymentResult<InitializeResponse>;

    async fn verify(&self, request: VerifyRequest) -> PaymentResult<VerifyResponse>;

    async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse>;

    fn name(&self) -> PaymentGateway;

    /// Checks the signature over the exact raw body. Returns false on any
    /// mismatch, missing secret or malformed input.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{GatewayPaymentStatus, Money, RefundStatus};
    use bigdecimal::BigDecimal;

    struct MockProvider;

    #[async_trait]
    impl PaymentProvider for MockProvider {
        async fn initialize(
            &self,
            request: InitializeRequest,
        ) -> PaymentResult<InitializeResponse> {
            Ok(InitializeResponse {
                authorization_url: format!("https://example.com/pay/{}", request.reference),
                provider_reference: Some("mock_ref".to_string()),
                provider_data: None,
            })
        }

        async fn verify(&self, request: VerifyRequest) -> PaymentResult<VerifyResponse> {
            Ok(VerifyResponse {
                status: GatewayPaymentStatus::Success,
                reference: request.reference,
                amount_paid: Some(BigDecimal::from(1000)),
                currency: Some("NGN".to_string()),
                provider_reference: Some("mock_ref".to_string()),
                provider_transaction_id: Some("42".to_string()),
                paid_at: None,
                gateway_response: None,
                raw_payload: serde_json::json!({}),
            })
        }

        async fn refund(&self, _request: RefundRequest) -> PaymentResult<RefundResponse> {
            Ok(RefundResponse {
                status: RefundStatus::Pending,
                provider_reference: Some("rf_1".to_string()),
                raw_payload: serde_json::json!({}),
            })
        }

        fn name(&self) -> PaymentGateway {
            PaymentGateway::Paystack
        }

        fn verify_webhook_signature(&self, _payload: &[u8], signature: &str) -> bool {
            signature == "ok"
        }

        fn parse_webhook_event(&self, _payload: &[u8]) -> PaymentResult<WebhookEvent> {
            Ok(WebhookEvent {
                gateway: PaymentGateway::Paystack,
                event_type: "charge.success".to_string(),
                event_id: "1".to_string(),
                reference: Some("QP_1".to_string()),
                provider_transaction_id: Some("1".to_string()),
                status: Some(GatewayPaymentStatus::Success),
                payload: serde_json::json!({}),
                received_at: chrono::Utc::now(),
            })
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_provider() {
        let provider: Box<dyn PaymentProvider> = Box::new(MockProvider);
        let init = provider
            .initialize(InitializeRequest {
                reference: "QP_1".to_string(),
                amount: Money::new(BigDecimal::from(1000), "NGN"),
                customer_email: "client@example.com".to_string(),
                callback_url: None,
                metadata: None,
            })
            .await
            .expect("initialization should succeed");
        assert!(init.authorization_url.ends_with("QP_1"));

        let verified = provider
            .verify(VerifyRequest {
                reference: "QP_1".to_string(),
                provider_transaction_id: None,
            })
            .await
            .expect("verify should succeed");
        assert_eq!(verified.status, GatewayPaymentStatus::Success);

        let refund = provider
            .refund(RefundRequest {
                reference: "QP_1".to_string(),
                provider_transaction_id: Some("42".to_string()),
                amount: None,
            })
            .await
            .expect("refund should succeed");
        assert!(refund.status.is_accepted());
        assert!(!provider.verify_webhook_signature(b"{}", "bad"));
    }
}
