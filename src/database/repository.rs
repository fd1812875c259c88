//! Storage seams used by the payment services.
//!
//! Postgres implementations live next to this module; `memory` provides the
//! same contracts in-process for tests and local runs.

use crate::database::error::DatabaseError;
use crate::database::quote_repository::Quote;
use crate::database::transaction_repository::PaymentTransaction;
use crate::database::webhook_repository::{NewWebhookEvent, RecordedWebhookEvent, WebhookEventRecord};
use crate::payments::types::{PaymentGateway, PaymentType, TransactionState};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub reference: String,
    pub quote_id: Uuid,
    pub client_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub gateway: PaymentGateway,
    pub payment_type: PaymentType,
    pub metadata: JsonValue,
}

/// Signed change to a quote's `paid_amount`, committed together with the
/// transaction's state change.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteAdjustment {
    pub quote_id: Uuid,
    pub delta: BigDecimal,
}

/// Columns written alongside a state transition. `None` keeps the stored
/// value; `metadata` is merged into the existing object.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub gateway_transaction_id: Option<String>,
    pub amount_paid: Option<BigDecimal>,
    pub refunded_amount: Option<BigDecimal>,
    pub failure_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub metadata: Option<JsonValue>,
    pub quote_adjustment: Option<QuoteAdjustment>,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub client_id: Option<Uuid>,
    pub quote_id: Option<Uuid>,
    pub status: Option<TransactionState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub const MAX_PER_PAGE: u32 = 100;

    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(20).clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.per_page)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Inserts a `pending` transaction. Fails with `DuplicateReference` if
    /// the reference was ever used.
    async fn create(&self, transaction: NewTransaction) -> Result<PaymentTransaction, DatabaseError>;

    async fn find_by_reference(&self, reference: &str)
        -> Result<PaymentTransaction, DatabaseError>;

    /// Records the checkout URL while the transaction is still `pending`.
    async fn attach_checkout(
        &self,
        reference: &str,
        authorization_url: &str,
        metadata: Option<JsonValue>,
    ) -> Result<PaymentTransaction, DatabaseError>;

    /// Atomic compare-and-set on the state column. Returns `StaleState` when
    /// the stored state is not `from`. A quote adjustment in `fields` is
    /// applied in the same storage transaction.
    async fn transition(
        &self,
        reference: &str,
        from: TransactionState,
        to: TransactionState,
        fields: TransitionFields,
    ) -> Result<PaymentTransaction, DatabaseError>;

    /// Marks a `completed` transaction as having a refund in flight.
    /// Returns `false` when another caller already holds the claim or the
    /// transaction is no longer `completed`.
    async fn claim_refund(&self, reference: &str) -> Result<bool, DatabaseError>;

    /// Drops the claim after the gateway declined or failed the refund.
    async fn release_refund(&self, reference: &str) -> Result<(), DatabaseError>;

    /// Oldest first.
    async fn list_by_quote(&self, quote_id: Uuid) -> Result<Vec<PaymentTransaction>, DatabaseError>;

    /// Newest first.
    async fn list(
        &self,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> Result<Page<PaymentTransaction>, DatabaseError>;

    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentTransaction>, DatabaseError>;
}

#[async_trait]
pub trait QuoteStore: Send + Sync {
    async fn find(&self, quote_id: Uuid) -> Result<Quote, DatabaseError>;
}

#[async_trait]
pub trait WebhookEventStore: Send + Sync {
    /// Logs a delivery keyed by `(gateway, event_id)`. Redeliveries return
    /// the existing record with `first_delivery = false`.
    async fn record(&self, event: NewWebhookEvent) -> Result<RecordedWebhookEvent, DatabaseError>;

    async fn mark_processed(&self, id: Uuid) -> Result<(), DatabaseError>;

    /// Bumps the attempt counter and stores the error.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), DatabaseError>;

    /// Failed events still under the attempt ceiling, oldest first.
    async fn retryable(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<WebhookEventRecord>, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_clamps_inputs() {
        let page = PageRequest::new(Some(0), Some(1000));
        assert_eq!(page.page, 1);
        assert_eq!(page.per_page, PageRequest::MAX_PER_PAGE);
        assert_eq!(page.offset(), 0);

        let third = PageRequest::new(Some(3), Some(25));
        assert_eq!(third.offset(), 50);
        assert_eq!(third.limit(), 25);
    }
}
