pub mod auth;
pub mod payments;
pub mod webhooks;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::{error, info};

use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::webhook_processor::WebhookProcessor;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub webhooks: Arc<WebhookProcessor>,
    pub health_checker: HealthChecker,
}

/// Application routes without the outer request-id and logging layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/api/payments/initialize", post(payments::initialize_payment))
        .route("/api/payments/verify", post(payments::verify_payment))
        .route("/api/payments", get(payments::list_payments))
        .route("/api/payments/{reference}", get(payments::get_payment))
        .route(
            "/api/payments/{reference}/refund",
            post(payments::refund_payment),
        )
        .route(
            "/api/payments/{reference}/confirm",
            post(payments::confirm_payment),
        )
        .route("/api/webhooks/{gateway}", post(webhooks::handle_webhook))
        .with_state(state)
}

/// Liveness: fails only when a component is down.
async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let health_status = state.health_checker.check_health().await;

    if matches!(health_status.status, HealthState::Unhealthy) {
        error!("Health check failed - service unhealthy");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(health_status)))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness: the service can take payment traffic.
async fn readiness(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let health_status = state.health_checker.check_health().await;

    if health_status.is_ready() {
        Ok(Json(health_status))
    } else {
        info!(status = ?health_status.status, "Readiness probe failed");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(health_status)))
    }
}
