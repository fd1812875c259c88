use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::QuoteStore;
use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Pending,
    Approved,
    PartiallyPaid,
    Paid,
    Rejected,
    Cancelled,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Pending => "pending",
            QuoteStatus::Approved => "approved",
            QuoteStatus::PartiallyPaid => "partially_paid",
            QuoteStatus::Paid => "paid",
            QuoteStatus::Rejected => "rejected",
            QuoteStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(QuoteStatus::Pending),
            "approved" => Some(QuoteStatus::Approved),
            "partially_paid" => Some(QuoteStatus::PartiallyPaid),
            "paid" => Some(QuoteStatus::Paid),
            "rejected" => Some(QuoteStatus::Rejected),
            "cancelled" => Some(QuoteStatus::Cancelled),
            _ => None,
        }
    }

    pub fn accepts_payments(&self) -> bool {
        matches!(self, QuoteStatus::Approved | QuoteStatus::PartiallyPaid)
    }

    /// Status after the paid balance changed. Mirrors the CASE expression
    /// applied by the Postgres store.
    pub fn after_balance_change(&self, paid: &BigDecimal, total: &BigDecimal) -> QuoteStatus {
        if !matches!(
            self,
            QuoteStatus::Approved | QuoteStatus::PartiallyPaid | QuoteStatus::Paid
        ) {
            return *self;
        }
        if paid >= total {
            QuoteStatus::Paid
        } else if *paid > BigDecimal::zero() {
            QuoteStatus::PartiallyPaid
        } else {
            QuoteStatus::Approved
        }
    }
}

impl std::fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Quote as seen by the payment flow. Owned by the quoting module; payments
/// only ever move `paid_amount` and `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub id: Uuid,
    pub client_id: Uuid,
    pub client_email: String,
    pub total_amount: BigDecimal,
    pub paid_amount: BigDecimal,
    pub currency: String,
    pub status: QuoteStatus,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    pub fn outstanding(&self) -> BigDecimal {
        let remaining = &self.total_amount - &self.paid_amount;
        if remaining < BigDecimal::zero() {
            BigDecimal::zero()
        } else {
            remaining
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct QuoteRow {
    id: Uuid,
    client_id: Uuid,
    client_email: String,
    total_amount: BigDecimal,
    paid_amount: BigDecimal,
    currency: String,
    status: String,
    updated_at: DateTime<Utc>,
}

impl TryFrom<QuoteRow> for Quote {
    type Error = DatabaseError;

    fn try_from(row: QuoteRow) -> Result<Self, Self::Error> {
        let status = QuoteStatus::from_db_status(&row.status).ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("unexpected quote status '{}' on {}", row.status, row.id),
            })
        })?;
        Ok(Self {
            id: row.id,
            client_id: row.client_id,
            client_email: row.client_email,
            total_amount: row.total_amount,
            paid_amount: row.paid_amount,
            currency: row.currency,
            status,
            updated_at: row.updated_at,
        })
    }
}

/// Read access to quotes. Balance changes go through the transaction store.
pub struct QuoteRepository {
    pool: PgPool,
}

impl QuoteRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuoteStore for QuoteRepository {
    async fn find(&self, quote_id: Uuid) -> Result<Quote, DatabaseError> {
        let row = sqlx::query_as::<_, QuoteRow>(
            "SELECT id, client_id, client_email, total_amount, paid_amount, currency, status,
                    updated_at
             FROM quotes
             WHERE id = $1",
        )
        .bind(quote_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("quote", quote_id.to_string()))?;

        row.try_into()
    }
}
