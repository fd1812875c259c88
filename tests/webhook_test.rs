//! Webhook delivery: signature checks, replays and the HTTP surface.

mod common;

use axum::body::Body;
use common::{charge_success_body, dec, sign, Harness, Outcome};
use http::{Request, StatusCode};
use quotepay_backend::api::{self, AppState};
use quotepay_backend::database::quote_repository::QuoteStatus;
use quotepay_backend::database::webhook_repository::WebhookEventStatus;
use quotepay_backend::health::HealthChecker;
use quotepay_backend::payments::types::{PaymentGateway, PaymentType, TransactionState};
use quotepay_backend::services::payment_orchestrator::InitializePayment;
use quotepay_backend::services::webhook_processor::{WebhookOutcome, WebhookProcessorError};
use tower::util::ServiceExt;

async fn pending_payment(h: &Harness, amount: &str) -> (uuid::Uuid, String) {
    let quote = h.approved_quote("100000").await;
    let init = h
        .orchestrator
        .initialize_payment(InitializePayment {
            quote_id: quote.id,
            gateway: PaymentGateway::Paystack,
            payment_type: PaymentType::Deposit,
            amount: dec(amount),
            client_id: None,
            callback_url: None,
        })
        .await
        .unwrap();
    (quote.id, init.reference)
}

#[tokio::test]
async fn replayed_webhook_matches_single_delivery() {
    let h = Harness::new();
    let (quote_id, reference) = pending_payment(&h, "30000").await;
    let body = charge_success_body(9001, &reference);
    let signature = sign(&body);

    let first = h
        .webhooks
        .process_webhook(PaymentGateway::Paystack, Some(&signature), &body)
        .await
        .unwrap();
    assert_eq!(
        first,
        WebhookOutcome::Processed {
            reference: reference.clone(),
            status: TransactionState::Completed,
        }
    );
    let after_first = h.orchestrator.get_payment(&reference).await.unwrap();

    for _ in 0..3 {
        let again = h
            .webhooks
            .process_webhook(PaymentGateway::Paystack, Some(&signature), &body)
            .await
            .unwrap();
        assert!(matches!(again, WebhookOutcome::Duplicate { .. }));
    }

    assert_eq!(h.orchestrator.get_payment(&reference).await.unwrap(), after_first);
    assert_eq!(h.quote(quote_id).await.paid_amount, dec("30000"));

    let events = h.store.webhook_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].delivery_count, 4);
    assert_eq!(events[0].status, WebhookEventStatus::Processed);
}

#[tokio::test]
async fn webhook_is_a_hint_not_a_verdict() {
    let h = Harness::new();
    let (quote_id, reference) = pending_payment(&h, "30000").await;
    // The body claims success but the gateway still reports pending.
    h.gateway.script(&reference, Outcome::pending());

    let body = charge_success_body(42, &reference);
    let outcome = h
        .webhooks
        .process_webhook(PaymentGateway::Paystack, Some(&sign(&body)), &body)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::Deferred {
            reference: reference.clone()
        }
    );

    let tx = h.orchestrator.get_payment(&reference).await.unwrap();
    assert_eq!(tx.status, TransactionState::Pending);
    assert_eq!(h.quote(quote_id).await.paid_amount, dec("0"));
    assert_eq!(
        h.store.webhook_events().await[0].status,
        WebhookEventStatus::Failed
    );
}

#[tokio::test]
async fn pending_webhook_settles_on_redelivery() {
    let h = Harness::new();
    let (quote_id, reference) = pending_payment(&h, "30000").await;
    h.gateway.script(&reference, Outcome::pending());

    let body = charge_success_body(43, &reference);
    let signature = sign(&body);
    h.webhooks
        .process_webhook(PaymentGateway::Paystack, Some(&signature), &body)
        .await
        .unwrap();

    // Retrying while the gateway still says pending keeps the event open.
    assert_eq!(h.webhooks.retry_failed(5, 10).await.unwrap(), 0);
    assert_eq!(h.store.webhook_events().await[0].attempts, 2);

    h.gateway.script(&reference, Outcome::success("30000"));
    let outcome = h
        .webhooks
        .process_webhook(PaymentGateway::Paystack, Some(&signature), &body)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::Processed {
            reference: reference.clone(),
            status: TransactionState::Completed,
        }
    );

    let events = h.store.webhook_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].delivery_count, 2);
    assert_eq!(events[0].status, WebhookEventStatus::Processed);
    assert_eq!(h.quote(quote_id).await.paid_amount, dec("30000"));
}

#[tokio::test]
async fn tampered_webhook_changes_nothing() {
    let h = Harness::new();
    let (quote_id, reference) = pending_payment(&h, "30000").await;
    let body = charge_success_body(7, &reference);
    let signature = sign(&body);

    let mut tampered = body.clone();
    let last = tampered.len() - 2;
    tampered[last] = b' ';

    let err = h
        .webhooks
        .process_webhook(PaymentGateway::Paystack, Some(&signature), &tampered)
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookProcessorError::InvalidSignature { .. }));

    let err = h
        .webhooks
        .process_webhook(PaymentGateway::Paystack, Some("deadbeef"), &body)
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookProcessorError::InvalidSignature { .. }));

    assert!(h.store.webhook_events().await.is_empty());
    assert_eq!(h.gateway.verify_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    let tx = h.orchestrator.get_payment(&reference).await.unwrap();
    assert_eq!(tx.status, TransactionState::Pending);
    assert_eq!(h.quote(quote_id).await.status, QuoteStatus::Approved);
}

#[tokio::test]
async fn failed_processing_is_retried_later() {
    let h = Harness::new();
    let (quote_id, reference) = pending_payment(&h, "30000").await;
    h.gateway.set_unreachable(true);

    let body = charge_success_body(11, &reference);
    assert!(h
        .webhooks
        .process_webhook(PaymentGateway::Paystack, Some(&sign(&body)), &body)
        .await
        .is_err());
    assert_eq!(
        h.store.webhook_events().await[0].status,
        WebhookEventStatus::Failed
    );

    h.gateway.set_unreachable(false);
    assert_eq!(h.webhooks.retry_failed(5, 10).await.unwrap(), 1);
    assert_eq!(
        h.store.webhook_events().await[0].status,
        WebhookEventStatus::Processed
    );
    assert_eq!(h.quote(quote_id).await.paid_amount, dec("30000"));
}

fn app(h: &Harness) -> axum::Router {
    api::router(AppState {
        orchestrator: h.orchestrator.clone(),
        webhooks: h.webhooks.clone(),
        health_checker: HealthChecker::new(None, vec![PaymentGateway::Paystack]),
    })
}

#[tokio::test]
async fn http_webhook_always_acknowledges_known_gateways() {
    let h = Harness::new();
    let (quote_id, reference) = pending_payment(&h, "30000").await;
    let body = charge_success_body(5, &reference);

    let forged = Request::builder()
        .method("POST")
        .uri("/api/webhooks/paystack")
        .header("x-paystack-signature", "forged")
        .body(Body::from(body.clone()))
        .unwrap();
    let response = app(&h).oneshot(forged).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.quote(quote_id).await.paid_amount, dec("0"));

    let signed = Request::builder()
        .method("POST")
        .uri("/api/webhooks/paystack")
        .header("x-paystack-signature", sign(&body))
        .body(Body::from(body))
        .unwrap();
    let response = app(&h).oneshot(signed).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.quote(quote_id).await.paid_amount, dec("30000"));

    let unknown = Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .body(Body::from("{}"))
        .unwrap();
    let response = app(&h).oneshot(unknown).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn http_payment_endpoints_enforce_caller_scope() {
    let h = Harness::new();
    let quote = h.approved_quote("100000").await;
    let client = quote.client_id.to_string();

    let init = Request::builder()
        .method("POST")
        .uri("/api/payments/initialize")
        .header("content-type", "application/json")
        .header("x-user-id", &client)
        .header("x-user-role", "client")
        .body(Body::from(
            serde_json::json!({
                "quote_id": quote.id,
                "payment_method": "paystack",
                "payment_type": "deposit",
                "amount": "30000"
            })
            .to_string(),
        ))
        .unwrap();
    let response = app(&h).oneshot(init).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let created: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let reference = created["reference"].as_str().unwrap().to_string();
    assert!(created["authorization_url"].is_string());

    let stranger = Request::builder()
        .uri(format!("/api/payments/{}", reference))
        .header("x-user-id", uuid::Uuid::new_v4().to_string())
        .body(Body::empty())
        .unwrap();
    let response = app(&h).oneshot(stranger).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let owner = Request::builder()
        .uri(format!("/api/payments/{}", reference))
        .header("x-user-id", &client)
        .body(Body::empty())
        .unwrap();
    let response = app(&h).oneshot(owner).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let refund = Request::builder()
        .method("POST")
        .uri(format!("/api/payments/{}/refund", reference))
        .header("x-user-id", &client)
        .body(Body::empty())
        .unwrap();
    let response = app(&h).oneshot(refund).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let anonymous = Request::builder()
        .uri("/api/payments")
        .body(Body::empty())
        .unwrap();
    let response = app(&h).oneshot(anonymous).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn http_deposit_below_floor_is_unprocessable() {
    let h = Harness::new();
    let quote = h.approved_quote("100000").await;

    let init = Request::builder()
        .method("POST")
        .uri("/api/payments/initialize")
        .header("content-type", "application/json")
        .header("x-user-id", quote.client_id.to_string())
        .header("x-request-id", "req-floor")
        .body(Body::from(
            serde_json::json!({
                "quote_id": quote.id,
                "payment_method": "paystack",
                "payment_type": "deposit",
                "amount": 29999.99
            })
            .to_string(),
        ))
        .unwrap();
    let response = app(&h).oneshot(init).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let error: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(error["error"], "INSUFFICIENT_DEPOSIT");
    assert_eq!(error["request_id"], "req-floor");
}

#[tokio::test]
async fn health_reports_degraded_memory_store() {
    let h = Harness::new();
    let response = app(&h)
        .oneshot(
            Request::builder()
                .uri("/health/ready")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
