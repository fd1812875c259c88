use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::api::auth::Caller;
use crate::api::AppState;
use crate::database::repository::{Page, PageRequest, TransactionFilter};
use crate::database::transaction_repository::PaymentTransaction;
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::middleware::error::get_request_id_from_headers;
use crate::payments::types::{PaymentGateway, PaymentType, TransactionState};
use crate::payments::utils::json_decimal;
use crate::services::payment_orchestrator::InitializePayment;

type ApiResult<T> = Result<T, AppError>;

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct InitializeBody {
    pub quote_id: Uuid,
    pub payment_method: String,
    pub payment_type: String,
    /// Accepted as a JSON number or a decimal string.
    pub amount: JsonValue,
    #[serde(default)]
    pub callback_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InitializeResponseBody {
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub status: TransactionState,
    pub amount: BigDecimal,
    pub currency: String,
    pub gateway: PaymentGateway,
}

#[derive(Debug, Deserialize)]
pub struct VerifyBody {
    pub reference: String,
}

/// Optional amount for refunds and offline confirmations.
#[derive(Debug, Default, Deserialize)]
pub struct AmountBody {
    #[serde(default)]
    pub amount: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub quote_id: Option<Uuid>,
    pub status: Option<String>,
}

/// What clients see of a transaction.
#[derive(Debug, Serialize)]
pub struct PaymentSummary {
    pub reference: String,
    pub quote_id: Uuid,
    pub amount: BigDecimal,
    pub amount_paid: Option<BigDecimal>,
    pub refunded_amount: Option<BigDecimal>,
    pub currency: String,
    pub gateway: PaymentGateway,
    pub payment_type: PaymentType,
    pub status: TransactionState,
    pub authorization_url: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<PaymentTransaction> for PaymentSummary {
    fn from(tx: PaymentTransaction) -> Self {
        Self {
            reference: tx.reference,
            quote_id: tx.quote_id,
            amount: tx.amount,
            amount_paid: tx.amount_paid,
            refunded_amount: tx.refunded_amount,
            currency: tx.currency,
            gateway: tx.gateway,
            payment_type: tx.payment_type,
            status: tx.status,
            authorization_url: tx.authorization_url,
            failure_reason: tx.failure_reason,
            created_at: tx.created_at,
            paid_at: tx.paid_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn with_request_id(err: impl Into<AppError>, headers: &HeaderMap) -> AppError {
    let err = err.into();
    match get_request_id_from_headers(headers) {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}

fn invalid_field(field: &str, reason: impl Into<String>) -> AppError {
    AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
        field: field.to_string(),
        reason: reason.into(),
    }))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        AppError::new(AppErrorKind::Validation(ValidationError::MalformedPayload {
            reason: rejection.body_text(),
        }))
    })
}

fn parse_amount(value: &JsonValue) -> ApiResult<BigDecimal> {
    json_decimal(value).ok_or_else(|| invalid_field("amount", "must be a decimal number"))
}

/// An empty body means "use the stored amount".
fn optional_amount(payload: &[u8]) -> ApiResult<Option<BigDecimal>> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let body: AmountBody = serde_json::from_slice(payload).map_err(|e| {
        AppError::new(AppErrorKind::Validation(ValidationError::MalformedPayload {
            reason: e.to_string(),
        }))
    })?;
    body.amount.as_ref().map(parse_amount).transpose()
}

/// Clients only see their own transactions. Someone else's reference is
/// reported as missing so references cannot be probed.
fn ensure_visible(caller: &Caller, tx: &PaymentTransaction) -> ApiResult<()> {
    match caller.client_scope() {
        Some(client_id) if client_id != tx.client_id => {
            Err(AppError::new(AppErrorKind::Domain(
                DomainError::TransactionNotFound {
                    reference: tx.reference.clone(),
                },
            )))
        }
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/payments/initialize
pub async fn initialize_payment(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    payload: Result<Json<InitializeBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<InitializeResponseBody>)> {
    let request = body(payload).map_err(|e| with_request_id(e, &headers))?;

    let gateway = PaymentGateway::from_str(&request.payment_method)
        .map_err(|e| with_request_id(e, &headers))?;
    let payment_type = PaymentType::from_str(&request.payment_type)
        .map_err(|e| with_request_id(e, &headers))?;
    let amount = parse_amount(&request.amount).map_err(|e| with_request_id(e, &headers))?;

    info!(
        quote_id = %request.quote_id,
        gateway = %gateway,
        payment_type = %payment_type,
        amount = %amount,
        "Payment initialization requested"
    );

    let initialized = state
        .orchestrator
        .initialize_payment(InitializePayment {
            quote_id: request.quote_id,
            gateway,
            payment_type,
            amount,
            client_id: caller.client_scope(),
            callback_url: request.callback_url,
        })
        .await
        .map_err(|e| with_request_id(e, &headers))?;

    let tx = initialized.transaction;
    Ok((
        StatusCode::CREATED,
        Json(InitializeResponseBody {
            reference: initialized.reference,
            authorization_url: initialized.authorization_url,
            instructions: initialized.instructions,
            status: tx.status,
            amount: tx.amount,
            currency: tx.currency,
            gateway: tx.gateway,
        }),
    ))
}

/// POST /api/payments/verify
pub async fn verify_payment(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    payload: Result<Json<VerifyBody>, JsonRejection>,
) -> ApiResult<Json<PaymentSummary>> {
    let request = body(payload).map_err(|e| with_request_id(e, &headers))?;
    let reference = request.reference.trim();
    if reference.is_empty() {
        return Err(with_request_id(
            AppError::new(AppErrorKind::Validation(ValidationError::MissingField {
                field: "reference".to_string(),
            })),
            &headers,
        ));
    }

    let existing = state
        .orchestrator
        .get_payment(reference)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    ensure_visible(&caller, &existing).map_err(|e| with_request_id(e, &headers))?;

    let tx = state
        .orchestrator
        .verify_payment(reference)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    Ok(Json(tx.into()))
}

/// GET /api/payments
pub async fn list_payments(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Page<PaymentSummary>>> {
    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => Some(
            TransactionState::from_db_status(raw.trim())
                .ok_or_else(|| with_request_id(invalid_field("status", "unknown status"), &headers))?,
        ),
    };

    let filter = TransactionFilter {
        client_id: caller.client_scope(),
        quote_id: query.quote_id,
        status,
    };
    let page = state
        .orchestrator
        .list_payments(&filter, PageRequest::new(query.page, query.per_page))
        .await
        .map_err(|e| with_request_id(e, &headers))?;

    Ok(Json(Page {
        items: page.items.into_iter().map(PaymentSummary::from).collect(),
        total: page.total,
        page: page.page,
        per_page: page.per_page,
    }))
}

/// GET /api/payments/{reference}
pub async fn get_payment(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    Path(reference): Path<String>,
) -> ApiResult<Json<PaymentSummary>> {
    let tx = state
        .orchestrator
        .get_payment(&reference)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    ensure_visible(&caller, &tx).map_err(|e| with_request_id(e, &headers))?;
    Ok(Json(tx.into()))
}

/// POST /api/payments/{reference}/refund
pub async fn refund_payment(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    Path(reference): Path<String>,
    payload: Bytes,
) -> ApiResult<Json<PaymentSummary>> {
    caller
        .require_admin()
        .map_err(|e| with_request_id(e, &headers))?;

    let amount = optional_amount(&payload).map_err(|e| with_request_id(e, &headers))?;

    info!(reference = %reference, admin = %caller.user_id, "Refund requested");
    let tx = state
        .orchestrator
        .refund(&reference, amount)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    Ok(Json(tx.into()))
}

/// POST /api/payments/{reference}/confirm
pub async fn confirm_payment(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    Path(reference): Path<String>,
    payload: Bytes,
) -> ApiResult<Json<PaymentSummary>> {
    caller
        .require_admin()
        .map_err(|e| with_request_id(e, &headers))?;

    let amount = optional_amount(&payload).map_err(|e| with_request_id(e, &headers))?;

    let tx = state
        .orchestrator
        .confirm_offline_payment(&reference, amount, Some(caller.user_id))
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    Ok(Json(tx.into()))
}
