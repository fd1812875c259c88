use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::WebhookEventStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventStatus {
    Received,
    Processed,
    Failed,
}

impl WebhookEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventStatus::Received => "received",
            WebhookEventStatus::Processed => "processed",
            WebhookEventStatus::Failed => "failed",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "received" => Some(WebhookEventStatus::Received),
            "processed" => Some(WebhookEventStatus::Processed),
            "failed" => Some(WebhookEventStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub gateway: String,
    pub event_id: String,
    pub event_type: String,
    pub reference: Option<String>,
    pub payload: JsonValue,
}

/// Logged gateway webhook delivery
#[derive(Debug, Clone)]
pub struct WebhookEventRecord {
    pub id: Uuid,
    pub gateway: String,
    pub event_id: String,
    pub event_type: String,
    pub reference: Option<String>,
    pub payload: JsonValue,
    pub status: WebhookEventStatus,
    pub attempts: i32,
    pub delivery_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct RecordedWebhookEvent {
    pub record: WebhookEventRecord,
    pub first_delivery: bool,
}

#[derive(Debug, Clone, FromRow)]
struct WebhookEventRow {
    id: Uuid,
    gateway: String,
    event_id: String,
    event_type: String,
    reference: Option<String>,
    payload: JsonValue,
    status: String,
    attempts: i32,
    delivery_count: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct RecordedRow {
    #[sqlx(flatten)]
    event: WebhookEventRow,
    first_delivery: bool,
}

impl TryFrom<WebhookEventRow> for WebhookEventRecord {
    type Error = DatabaseError;

    fn try_from(row: WebhookEventRow) -> Result<Self, Self::Error> {
        let status = WebhookEventStatus::from_db_status(&row.status).ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("unexpected webhook status '{}' on {}", row.status, row.id),
            })
        })?;
        Ok(Self {
            id: row.id,
            gateway: row.gateway,
            event_id: row.event_id,
            event_type: row.event_type,
            reference: row.reference,
            payload: row.payload,
            status,
            attempts: row.attempts,
            delivery_count: row.delivery_count,
            last_error: row.last_error,
            created_at: row.created_at,
            processed_at: row.processed_at,
        })
    }
}

const COLUMNS: &str = "id, gateway, event_id, event_type, reference, payload, status, attempts, \
     delivery_count, last_error, created_at, processed_at";

/// Postgres-backed webhook event log
pub struct WebhookEventRepository {
    pool: PgPool,
}

impl WebhookEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookEventStore for WebhookEventRepository {
    async fn record(&self, event: NewWebhookEvent) -> Result<RecordedWebhookEvent, DatabaseError> {
        // xmax is zero only for rows created by this statement.
        let row = sqlx::query_as::<_, RecordedRow>(&format!(
            "INSERT INTO webhook_events
             (id, gateway, event_id, event_type, reference, payload, status)
             VALUES ($1, $2, $3, $4, $5, $6, 'received')
             ON CONFLICT (gateway, event_id) DO UPDATE
             SET delivery_count = webhook_events.delivery_count + 1
             RETURNING {}, (xmax = 0) AS first_delivery",
            COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&event.gateway)
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(&event.reference)
        .bind(&event.payload)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(RecordedWebhookEvent {
            first_delivery: row.first_delivery,
            record: row.event.try_into()?,
        })
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE webhook_events
             SET status = 'processed', processed_at = NOW(), last_error = NULL
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE webhook_events
             SET status = 'failed', attempts = attempts + 1, last_error = $2
             WHERE id = $1 AND status <> 'processed'",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn retryable(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<WebhookEventRecord>, DatabaseError> {
        let rows = sqlx::query_as::<_, WebhookEventRow>(&format!(
            "SELECT {} FROM webhook_events
             WHERE status = 'failed' AND attempts < $1
             ORDER BY created_at ASC
             LIMIT $2",
            COLUMNS
        ))
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(WebhookEventRecord::try_from).collect()
    }
}
