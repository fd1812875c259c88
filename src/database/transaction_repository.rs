use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{
    NewTransaction, Page, PageRequest, TransactionFilter, TransactionStore, TransitionFields,
};
use crate::payments::types::{PaymentGateway, PaymentType, TransactionState};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

/// One attempt to collect money against a quote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub reference: String,
    pub quote_id: Uuid,
    pub client_id: Uuid,
    /// Requested amount. Never changes after creation.
    pub amount: BigDecimal,
    pub currency: String,
    pub gateway: PaymentGateway,
    pub payment_type: PaymentType,
    pub status: TransactionState,
    pub gateway_transaction_id: Option<String>,
    pub authorization_url: Option<String>,
    /// Amount the gateway confirmed, which is what the quote was credited.
    pub amount_paid: Option<BigDecimal>,
    pub refunded_amount: Option<BigDecimal>,
    pub failure_reason: Option<String>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentTransaction {
    /// Amount currently credited to the quote by this transaction.
    pub fn settled_amount(&self) -> BigDecimal {
        let paid = self
            .amount_paid
            .clone()
            .unwrap_or_else(|| self.amount.clone());
        match &self.refunded_amount {
            Some(refunded) => paid - refunded,
            None => paid,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct TransactionRow {
    pub id: Uuid,
    pub reference: String,
    pub quote_id: Uuid,
    pub client_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub gateway: String,
    pub payment_type: String,
    pub status: String,
    pub gateway_transaction_id: Option<String>,
    pub authorization_url: Option<String>,
    pub amount_paid: Option<BigDecimal>,
    pub refunded_amount: Option<BigDecimal>,
    pub failure_reason: Option<String>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for PaymentTransaction {
    type Error = DatabaseError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let corrupt = |column: &str, value: &str| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!(
                    "unexpected {} '{}' on transaction {}",
                    column, value, row.reference
                ),
            })
        };

        let status = TransactionState::from_db_status(&row.status)
            .ok_or_else(|| corrupt("status", &row.status))?;
        let gateway = PaymentGateway::from_str(&row.gateway)
            .map_err(|_| corrupt("gateway", &row.gateway))?;
        let payment_type = PaymentType::from_str(&row.payment_type)
            .map_err(|_| corrupt("payment_type", &row.payment_type))?;

        Ok(Self {
            id: row.id,
            reference: row.reference,
            quote_id: row.quote_id,
            client_id: row.client_id,
            amount: row.amount,
            currency: row.currency,
            gateway,
            payment_type,
            status,
            gateway_transaction_id: row.gateway_transaction_id,
            authorization_url: row.authorization_url,
            amount_paid: row.amount_paid,
            refunded_amount: row.refunded_amount,
            failure_reason: row.failure_reason,
            metadata: row.metadata,
            created_at: row.created_at,
            paid_at: row.paid_at,
            updated_at: row.updated_at,
        })
    }
}

/// Metadata key set while a refund is in flight at the gateway.
pub const REFUND_CLAIM: &str = "refund_claimed_at";

const COLUMNS: &str = "id, reference, quote_id, client_id, amount, currency, gateway, payment_type, \
     status, gateway_transaction_id, authorization_url, amount_paid, refunded_amount, \
     failure_reason, metadata, created_at, paid_at, updated_at";

/// Recomputes the quote status from its new balance. Statuses outside the
/// payment flow are left alone.
pub(crate) const QUOTE_ADJUST_SQL: &str = "UPDATE quotes
     SET paid_amount = paid_amount + $2,
         status = CASE
             WHEN status NOT IN ('approved', 'partially_paid', 'paid') THEN status
             WHEN paid_amount + $2 >= total_amount THEN 'paid'
             WHEN paid_amount + $2 > 0 THEN 'partially_paid'
             ELSE 'approved'
         END,
         updated_at = NOW()
     WHERE id = $1";

/// Postgres-backed transaction store
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_insert_error(err: sqlx::Error, reference: &str) -> DatabaseError {
        let err = DatabaseError::from_sqlx(err);
        match err.kind {
            DatabaseErrorKind::UniqueViolation { .. } => {
                DatabaseError::new(DatabaseErrorKind::DuplicateReference {
                    reference: reference.to_string(),
                })
            }
            _ => err,
        }
    }

    async fn stale_or_missing(
        &self,
        reference: &str,
        expected: TransactionState,
    ) -> DatabaseError {
        match self.find_by_reference(reference).await {
            Ok(current) => DatabaseError::new(DatabaseErrorKind::StaleState {
                reference: reference.to_string(),
                expected: expected.as_str().to_string(),
                actual: current.status.as_str().to_string(),
            }),
            Err(err) => err,
        }
    }
}

#[async_trait]
impl TransactionStore for TransactionRepository {
    async fn create(&self, tx: NewTransaction) -> Result<PaymentTransaction, DatabaseError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "INSERT INTO payment_transactions
             (id, reference, quote_id, client_id, amount, currency, gateway, payment_type,
              status, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9)
             RETURNING {}",
            COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&tx.reference)
        .bind(tx.quote_id)
        .bind(tx.client_id)
        .bind(&tx.amount)
        .bind(&tx.currency)
        .bind(tx.gateway.as_str())
        .bind(tx.payment_type.as_str())
        .bind(&tx.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Self::map_insert_error(e, &tx.reference))?;

        row.try_into()
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<PaymentTransaction, DatabaseError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM payment_transactions WHERE reference = $1",
            COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("transaction", reference))?;

        row.try_into()
    }

    async fn attach_checkout(
        &self,
        reference: &str,
        authorization_url: &str,
        metadata: Option<JsonValue>,
    ) -> Result<PaymentTransaction, DatabaseError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "UPDATE payment_transactions
             SET authorization_url = $2,
                 metadata = metadata || COALESCE($3, '{{}}'::jsonb),
                 updated_at = NOW()
             WHERE reference = $1 AND status = 'pending'
             RETURNING {}",
            COLUMNS
        ))
        .bind(reference)
        .bind(authorization_url)
        .bind(metadata)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self
                .stale_or_missing(reference, TransactionState::Pending)
                .await),
        }
    }

    async fn transition(
        &self,
        reference: &str,
        from: TransactionState,
        to: TransactionState,
        fields: TransitionFields,
    ) -> Result<PaymentTransaction, DatabaseError> {
        DatabaseError::check_transition(reference, from, to)?;
        let mut db_tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "UPDATE payment_transactions
             SET status = $3,
                 gateway_transaction_id = COALESCE($4, gateway_transaction_id),
                 amount_paid = COALESCE($5, amount_paid),
                 refunded_amount = COALESCE($6, refunded_amount),
                 failure_reason = COALESCE($7, failure_reason),
                 paid_at = COALESCE($8, paid_at),
                 metadata = metadata || COALESCE($9, '{{}}'::jsonb),
                 updated_at = NOW()
             WHERE reference = $1 AND status = $2
             RETURNING {}",
            COLUMNS
        ))
        .bind(reference)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(&fields.gateway_transaction_id)
        .bind(&fields.amount_paid)
        .bind(&fields.refunded_amount)
        .bind(&fields.failure_reason)
        .bind(fields.paid_at)
        .bind(&fields.metadata)
        .fetch_optional(&mut *db_tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let row = match row {
            Some(row) => row,
            None => {
                db_tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                return Err(self.stale_or_missing(reference, from).await);
            }
        };

        if let Some(adjustment) = &fields.quote_adjustment {
            let result = sqlx::query(QUOTE_ADJUST_SQL)
                .bind(adjustment.quote_id)
                .bind(&adjustment.delta)
                .execute(&mut *db_tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;
            if result.rows_affected() == 0 {
                db_tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                return Err(DatabaseError::not_found(
                    "quote",
                    adjustment.quote_id.to_string(),
                ));
            }
        }

        db_tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        debug!(reference, from = %from, to = %to, "transaction transitioned");
        row.try_into()
    }

    async fn claim_refund(&self, reference: &str) -> Result<bool, DatabaseError> {
        let claimed = sqlx::query(
            "UPDATE payment_transactions
             SET metadata = metadata || jsonb_build_object($2::text, NOW()),
                 updated_at = NOW()
             WHERE reference = $1 AND status = 'completed' AND metadata->>$2 IS NULL",
        )
        .bind(reference)
        .bind(REFUND_CLAIM)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if claimed.rows_affected() == 1 {
            return Ok(true);
        }
        // Surface a missing reference instead of reporting a lost claim.
        self.find_by_reference(reference).await?;
        Ok(false)
    }

    async fn release_refund(&self, reference: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE payment_transactions
             SET metadata = metadata - $2::text, updated_at = NOW()
             WHERE reference = $1 AND status = 'completed'",
        )
        .bind(reference)
        .bind(REFUND_CLAIM)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn list_by_quote(
        &self,
        quote_id: Uuid,
    ) -> Result<Vec<PaymentTransaction>, DatabaseError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM payment_transactions WHERE quote_id = $1 ORDER BY created_at ASC",
            COLUMNS
        ))
        .bind(quote_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(PaymentTransaction::try_from).collect()
    }

    async fn list(
        &self,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> Result<Page<PaymentTransaction>, DatabaseError> {
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM payment_transactions
             WHERE ($1::uuid IS NULL OR client_id = $1)
               AND ($2::uuid IS NULL OR quote_id = $2)
               AND ($3::text IS NULL OR status = $3)",
        )
        .bind(filter.client_id)
        .bind(filter.quote_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM payment_transactions
             WHERE ($1::uuid IS NULL OR client_id = $1)
               AND ($2::uuid IS NULL OR quote_id = $2)
               AND ($3::text IS NULL OR status = $3)
             ORDER BY created_at DESC
             LIMIT $4 OFFSET $5",
            COLUMNS
        ))
        .bind(filter.client_id)
        .bind(filter.quote_id)
        .bind(status)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(PaymentTransaction::try_from)
                .collect::<Result<_, _>>()?,
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentTransaction>, DatabaseError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM payment_transactions
             WHERE status = 'pending' AND created_at < $1
             ORDER BY created_at ASC
             LIMIT $2",
            COLUMNS
        ))
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(PaymentTransaction::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str) -> TransactionRow {
        let now = Utc::now();
        TransactionRow {
            id: Uuid::new_v4(),
            reference: "QP_20260101_abc".to_string(),
            quote_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            amount: BigDecimal::from(30000),
            currency: "NGN".to_string(),
            gateway: "paystack".to_string(),
            payment_type: "deposit".to_string(),
            status: status.to_string(),
            gateway_transaction_id: None,
            authorization_url: None,
            amount_paid: None,
            refunded_amount: None,
            failure_reason: None,
            metadata: serde_json::json!({}),
            created_at: now,
            paid_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn row_converts_into_domain_transaction() {
        let tx: PaymentTransaction = row("completed").try_into().unwrap();
        assert_eq!(tx.status, TransactionState::Completed);
        assert_eq!(tx.gateway, PaymentGateway::Paystack);
        assert_eq!(tx.payment_type, PaymentType::Deposit);
    }

    #[test]
    fn unknown_status_is_reported() {
        let result: Result<PaymentTransaction, _> = row("processing").try_into();
        assert!(result.is_err());
    }

    #[test]
    fn settled_amount_prefers_verified_figure_and_subtracts_refunds() {
        let mut tx: PaymentTransaction = row("completed").try_into().unwrap();
        assert_eq!(tx.settled_amount(), BigDecimal::from(30000));

        tx.amount_paid = Some(BigDecimal::from_str("29999.99").unwrap());
        tx.refunded_amount = Some(BigDecimal::from(10000));
        assert_eq!(
            tx.settled_amount(),
            BigDecimal::from_str("19999.99").unwrap()
        );
    }

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL with migrations applied
    async fn test_create_and_transition_roundtrip() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
        let pool = crate::database::init_pool(&url, None).await.unwrap();
        let repo = TransactionRepository::new(pool);
        let reference = format!("QP_TEST_{}", Uuid::new_v4().simple());

        let quote_id: Uuid = sqlx::query_scalar(
            "INSERT INTO quotes (id, client_id, client_email, total_amount, paid_amount, currency, status)
             VALUES ($1, $2, 'db-test@example.com', 100000, 0, 'NGN', 'approved') RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(Uuid::new_v4())
        .fetch_one(&repo.pool)
        .await
        .unwrap();

        let created = repo
            .create(NewTransaction {
                reference: reference.clone(),
                quote_id,
                client_id: Uuid::new_v4(),
                amount: BigDecimal::from(30000),
                currency: "NGN".to_string(),
                gateway: PaymentGateway::Paystack,
                payment_type: PaymentType::Deposit,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();
        assert_eq!(created.status, TransactionState::Pending);

        let completed = repo
            .transition(
                &reference,
                TransactionState::Pending,
                TransactionState::Completed,
                TransitionFields {
                    amount_paid: Some(BigDecimal::from(30000)),
                    quote_adjustment: Some(crate::database::repository::QuoteAdjustment {
                        quote_id,
                        delta: BigDecimal::from(30000),
                    }),
                    ..TransitionFields::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(completed.status, TransactionState::Completed);

        let stale = repo
            .transition(
                &reference,
                TransactionState::Pending,
                TransactionState::Completed,
                TransitionFields::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(stale.kind, DatabaseErrorKind::StaleState { .. }));
    }
}
