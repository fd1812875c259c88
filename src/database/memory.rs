//! In-process store implementing every storage trait.
//!
//! One lock guards transactions, quotes and webhook events together so a
//! transition and its quote adjustment commit as a unit, matching the
//! Postgres store.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::quote_repository::Quote;
use crate::database::repository::{
    NewTransaction, Page, PageRequest, QuoteStore, TransactionFilter, TransactionStore,
    TransitionFields, WebhookEventStore,
};
use crate::database::transaction_repository::{PaymentTransaction, REFUND_CLAIM};
use crate::database::webhook_repository::{
    NewWebhookEvent, RecordedWebhookEvent, WebhookEventRecord, WebhookEventStatus,
};
use crate::payments::types::TransactionState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default, Debug)]
struct MemoryState {
    /// Insertion order doubles as creation order.
    transactions: Vec<PaymentTransaction>,
    by_reference: HashMap<String, usize>,
    quotes: HashMap<Uuid, Quote>,
    webhook_events: Vec<WebhookEventRecord>,
}

#[derive(Default, Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

fn merge_metadata(target: &mut JsonValue, patch: Option<&JsonValue>) {
    let Some(JsonValue::Object(patch)) = patch else {
        return;
    };
    if !target.is_object() {
        *target = JsonValue::Object(serde_json::Map::new());
    }
    if let JsonValue::Object(map) = target {
        for (k, v) in patch {
            map.insert(k.clone(), v.clone());
        }
    }
}

fn matches_filter(tx: &PaymentTransaction, filter: &TransactionFilter) -> bool {
    filter.client_id.map_or(true, |id| tx.client_id == id)
        && filter.quote_id.map_or(true, |id| tx.quote_id == id)
        && filter.status.map_or(true, |s| tx.status == s)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_quote(&self, quote: Quote) {
        self.state.lock().await.quotes.insert(quote.id, quote);
    }

    pub async fn webhook_events(&self) -> Vec<WebhookEventRecord> {
        self.state.lock().await.webhook_events.clone()
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn create(&self, new: NewTransaction) -> Result<PaymentTransaction, DatabaseError> {
        let mut state = self.state.lock().await;
        if state.by_reference.contains_key(&new.reference) {
            return Err(DatabaseError::new(DatabaseErrorKind::DuplicateReference {
                reference: new.reference,
            }));
        }

        let now = Utc::now();
        let tx = PaymentTransaction {
            id: Uuid::new_v4(),
            reference: new.reference,
            quote_id: new.quote_id,
            client_id: new.client_id,
            amount: new.amount,
            currency: new.currency,
            gateway: new.gateway,
            payment_type: new.payment_type,
            status: TransactionState::Pending,
            gateway_transaction_id: None,
            authorization_url: None,
            amount_paid: None,
            refunded_amount: None,
            failure_reason: None,
            metadata: new.metadata,
            created_at: now,
            paid_at: None,
            updated_at: now,
        };
        let index = state.transactions.len();
        state.by_reference.insert(tx.reference.clone(), index);
        state.transactions.push(tx.clone());
        Ok(tx)
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<PaymentTransaction, DatabaseError> {
        let state = self.state.lock().await;
        state
            .by_reference
            .get(reference)
            .map(|&i| state.transactions[i].clone())
            .ok_or_else(|| DatabaseError::not_found("transaction", reference))
    }

    async fn attach_checkout(
        &self,
        reference: &str,
        authorization_url: &str,
        metadata: Option<JsonValue>,
    ) -> Result<PaymentTransaction, DatabaseError> {
        let mut state = self.state.lock().await;
        let index = *state
            .by_reference
            .get(reference)
            .ok_or_else(|| DatabaseError::not_found("transaction", reference))?;
        let tx = &mut state.transactions[index];
        if tx.status != TransactionState::Pending {
            return Err(DatabaseError::new(DatabaseErrorKind::StaleState {
                reference: reference.to_string(),
                expected: TransactionState::Pending.as_str().to_string(),
                actual: tx.status.as_str().to_string(),
            }));
        }
        tx.authorization_url = Some(authorization_url.to_string());
        merge_metadata(&mut tx.metadata, metadata.as_ref());
        tx.updated_at = Utc::now();
        Ok(tx.clone())
    }

    async fn transition(
        &self,
        reference: &str,
        from: TransactionState,
        to: TransactionState,
        fields: TransitionFields,
    ) -> Result<PaymentTransaction, DatabaseError> {
        DatabaseError::check_transition(reference, from, to)?;
        let mut state = self.state.lock().await;
        let index = *state
            .by_reference
            .get(reference)
            .ok_or_else(|| DatabaseError::not_found("transaction", reference))?;

        let current = state.transactions[index].status;
        if current != from {
            return Err(DatabaseError::new(DatabaseErrorKind::StaleState {
                reference: reference.to_string(),
                expected: from.as_str().to_string(),
                actual: current.as_str().to_string(),
            }));
        }

        // Validate the quote before touching anything so a failure leaves
        // both rows as they were.
        if let Some(adjustment) = &fields.quote_adjustment {
            if !state.quotes.contains_key(&adjustment.quote_id) {
                return Err(DatabaseError::not_found(
                    "quote",
                    adjustment.quote_id.to_string(),
                ));
            }
        }

        let now = Utc::now();
        if let Some(adjustment) = &fields.quote_adjustment {
            if let Some(quote) = state.quotes.get_mut(&adjustment.quote_id) {
                quote.paid_amount = &quote.paid_amount + &adjustment.delta;
                quote.status = quote
                    .status
                    .after_balance_change(&quote.paid_amount, &quote.total_amount);
                quote.updated_at = now;
            }
        }

        let tx = &mut state.transactions[index];
        tx.status = to;
        if fields.gateway_transaction_id.is_some() {
            tx.gateway_transaction_id = fields.gateway_transaction_id;
        }
        if fields.amount_paid.is_some() {
            tx.amount_paid = fields.amount_paid;
        }
        if fields.refunded_amount.is_some() {
            tx.refunded_amount = fields.refunded_amount;
        }
        if fields.failure_reason.is_some() {
            tx.failure_reason = fields.failure_reason;
        }
        if fields.paid_at.is_some() {
            tx.paid_at = fields.paid_at;
        }
        merge_metadata(&mut tx.metadata, fields.metadata.as_ref());
        tx.updated_at = now;
        Ok(tx.clone())
    }

    async fn claim_refund(&self, reference: &str) -> Result<bool, DatabaseError> {
        let mut state = self.state.lock().await;
        let index = *state
            .by_reference
            .get(reference)
            .ok_or_else(|| DatabaseError::not_found("transaction", reference))?;
        let tx = &mut state.transactions[index];
        if tx.status != TransactionState::Completed || tx.metadata.get(REFUND_CLAIM).is_some() {
            return Ok(false);
        }
        let now = Utc::now();
        merge_metadata(
            &mut tx.metadata,
            Some(&serde_json::json!({ REFUND_CLAIM: now })),
        );
        tx.updated_at = now;
        Ok(true)
    }

    async fn release_refund(&self, reference: &str) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().await;
        let index = *state
            .by_reference
            .get(reference)
            .ok_or_else(|| DatabaseError::not_found("transaction", reference))?;
        let tx = &mut state.transactions[index];
        if tx.status == TransactionState::Completed {
            if let JsonValue::Object(map) = &mut tx.metadata {
                map.remove(REFUND_CLAIM);
            }
            tx.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_by_quote(
        &self,
        quote_id: Uuid,
    ) -> Result<Vec<PaymentTransaction>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|tx| tx.quote_id == quote_id)
            .cloned()
            .collect())
    }

    async fn list(
        &self,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> Result<Page<PaymentTransaction>, DatabaseError> {
        let state = self.state.lock().await;
        let matching: Vec<&PaymentTransaction> = state
            .transactions
            .iter()
            .rev()
            .filter(|tx| matches_filter(tx, filter))
            .collect();

        Ok(Page {
            total: matching.len() as i64,
            items: matching
                .into_iter()
                .skip(page.offset() as usize)
                .take(page.per_page as usize)
                .cloned()
                .collect(),
            page: page.page,
            per_page: page.per_page,
        })
    }

    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentTransaction>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|tx| tx.status == TransactionState::Pending && tx.created_at < older_than)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl QuoteStore for MemoryStore {
    async fn find(&self, quote_id: Uuid) -> Result<Quote, DatabaseError> {
        self.state
            .lock()
            .await
            .quotes
            .get(&quote_id)
            .cloned()
            .ok_or_else(|| DatabaseError::not_found("quote", quote_id.to_string()))
    }
}

#[async_trait]
impl WebhookEventStore for MemoryStore {
    async fn record(&self, event: NewWebhookEvent) -> Result<RecordedWebhookEvent, DatabaseError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .webhook_events
            .iter_mut()
            .find(|e| e.gateway == event.gateway && e.event_id == event.event_id)
        {
            existing.delivery_count += 1;
            return Ok(RecordedWebhookEvent {
                record: existing.clone(),
                first_delivery: false,
            });
        }

        let record = WebhookEventRecord {
            id: Uuid::new_v4(),
            gateway: event.gateway,
            event_id: event.event_id,
            event_type: event.event_type,
            reference: event.reference,
            payload: event.payload,
            status: WebhookEventStatus::Received,
            attempts: 0,
            delivery_count: 1,
            last_error: None,
            created_at: Utc::now(),
            processed_at: None,
        };
        state.webhook_events.push(record.clone());
        Ok(RecordedWebhookEvent {
            record,
            first_delivery: true,
        })
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().await;
        if let Some(event) = state.webhook_events.iter_mut().find(|e| e.id == id) {
            event.status = WebhookEventStatus::Processed;
            event.processed_at = Some(Utc::now());
            event.last_error = None;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().await;
        if let Some(event) = state
            .webhook_events
            .iter_mut()
            .find(|e| e.id == id && e.status != WebhookEventStatus::Processed)
        {
            event.status = WebhookEventStatus::Failed;
            event.attempts += 1;
            event.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn retryable(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<WebhookEventRecord>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .webhook_events
            .iter()
            .filter(|e| e.status == WebhookEventStatus::Failed && e.attempts < max_attempts)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
