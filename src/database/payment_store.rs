//! Persistence for the payment aggregate.
//!
//! The aggregate and its sessions are always written in one transaction so
//! observers never see a payment status that disagrees with its sessions.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::domain::payment::{Payment, ProviderSession};

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Persist a new payment together with its sessions atomically.
    async fn insert(&self, payment: &Payment) -> Result<(), DatabaseError>;

    /// Write the aggregate row and upsert every session in one transaction.
    async fn update(&self, payment: &Payment) -> Result<(), DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError>;

    async fn find_by_idempotency_key(&self, key: Uuid) -> Result<Option<Payment>, DatabaseError>;

    async fn find_by_provider_order_id(
        &self,
        provider_order_id: &str,
    ) -> Result<Option<Payment>, DatabaseError>;

    /// Sweeper query: PENDING payments whose expiry has passed, oldest
    /// expiry first. The comparison is inclusive.
    async fn find_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, DatabaseError>;
}

#[derive(Debug, Clone, FromRow)]
struct PaymentRow {
    id: Uuid,
    user_id: Uuid,
    order_id: Uuid,
    amount: i64,
    currency: String,
    status: String,
    idempotency_key: Uuid,
    provider_order_id: Option<String>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct SessionRow {
    id: Uuid,
    payment_id: Uuid,
    provider: String,
    provider_order_id: Option<String>,
    provider_payment_id: Option<String>,
    provider_amount: i64,
    provider_currency: String,
    fx_rate: Option<BigDecimal>,
    fx_timestamp: Option<DateTime<Utc>>,
    status: String,
    metadata: JsonValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn parse_error(message: String) -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::Unknown { message })
}

fn payment_from_rows(row: PaymentRow, sessions: Vec<SessionRow>) -> Result<Payment, DatabaseError> {
    let mut payment = Payment {
        id: row.id,
        user_id: row.user_id,
        order_id: row.order_id,
        amount: row.amount,
        currency: row.currency,
        idempotency_key: row.idempotency_key,
        status: row.status.parse().map_err(parse_error)?,
        provider_order_id: row.provider_order_id,
        expires_at: row.expires_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
        sessions: Vec::with_capacity(sessions.len()),
    };
    for session in sessions {
        payment.sessions.push(ProviderSession {
            id: session.id,
            payment_id: session.payment_id,
            provider: session.provider.parse().map_err(|e| {
                parse_error(format!("session provider: {}", e))
            })?,
            provider_order_id: session.provider_order_id,
            provider_payment_id: session.provider_payment_id,
            provider_amount: session.provider_amount,
            provider_currency: session.provider_currency,
            fx_rate: session.fx_rate,
            fx_timestamp: session.fx_timestamp,
            status: session.status.parse().map_err(parse_error)?,
            metadata: session.metadata,
            created_at: session.created_at,
            updated_at: session.updated_at,
        });
    }
    Ok(payment)
}

const PAYMENT_COLUMNS: &str = "id, user_id, order_id, amount, currency, status, idempotency_key, provider_order_id, expires_at, created_at, updated_at";
const SESSION_COLUMNS: &str = "id, payment_id, provider, provider_order_id, provider_payment_id, provider_amount, provider_currency, fx_rate, fx_timestamp, status, metadata, created_at, updated_at";

pub struct PostgresPaymentStore {
    pool: PgPool,
}

impl PostgresPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open the store's pool and verify the database answers before any
    /// payment work is accepted. Unlike the cache, an unreachable database
    /// is fatal: nothing in this service can run without its aggregate
    /// store.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(&config.url)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let store = Self { pool };
        store.ping().await?;
        info!(
            max_connections = config.max_connections,
            "payment store connected"
        );
        Ok(store)
    }

    /// Round-trip liveness probe, used by the health surface.
    pub async fn ping(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn load_sessions(&self, payment_id: Uuid) -> Result<Vec<SessionRow>, DatabaseError> {
        sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM payment_provider_sessions WHERE payment_id = $1 ORDER BY created_at ASC",
            SESSION_COLUMNS
        ))
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn load_aggregate(
        &self,
        row: Option<PaymentRow>,
    ) -> Result<Option<Payment>, DatabaseError> {
        match row {
            Some(row) => {
                let sessions = self.load_sessions(row.id).await?;
                payment_from_rows(row, sessions).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn upsert_session<'e, E>(executor: E, session: &ProviderSession) -> Result<(), DatabaseError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            "INSERT INTO payment_provider_sessions \
             (id, payment_id, provider, provider_order_id, provider_payment_id, provider_amount, provider_currency, fx_rate, fx_timestamp, status, metadata, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (id) DO UPDATE \
             SET provider_order_id = EXCLUDED.provider_order_id, \
                 provider_payment_id = EXCLUDED.provider_payment_id, \
                 status = EXCLUDED.status, \
                 metadata = EXCLUDED.metadata, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(session.id)
        .bind(session.payment_id)
        .bind(session.provider.as_str())
        .bind(&session.provider_order_id)
        .bind(&session.provider_payment_id)
        .bind(session.provider_amount)
        .bind(&session.provider_currency)
        .bind(&session.fx_rate)
        .bind(session.fx_timestamp)
        .bind(session.status.as_str())
        .bind(&session.metadata)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(executor)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    async fn insert(&self, payment: &Payment) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        sqlx::query(
            "INSERT INTO payments \
             (id, user_id, order_id, amount, currency, status, idempotency_key, provider_order_id, expires_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(payment.id)
        .bind(payment.user_id)
        .bind(payment.order_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(payment.idempotency_key)
        .bind(&payment.provider_order_id)
        .bind(payment.expires_at)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        for session in &payment.sessions {
            Self::upsert_session(&mut *tx, session).await?;
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)
    }

    async fn update(&self, payment: &Payment) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let result = sqlx::query(
            "UPDATE payments \
             SET status = $2, provider_order_id = $3, updated_at = $4 \
             WHERE id = $1",
        )
        .bind(payment.id)
        .bind(payment.status.as_str())
        .bind(&payment.provider_order_id)
        .bind(payment.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Err(DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "Payment".to_string(),
                id: payment.id.to_string(),
            }));
        }

        for session in &payment.sessions {
            Self::upsert_session(&mut *tx, session).await?;
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        self.load_aggregate(row).await
    }

    async fn find_by_idempotency_key(&self, key: Uuid) -> Result<Option<Payment>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE idempotency_key = $1",
            PAYMENT_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        self.load_aggregate(row).await
    }

    async fn find_by_provider_order_id(
        &self,
        provider_order_id: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE provider_order_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(provider_order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        self.load_aggregate(row).await
    }

    async fn find_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, DatabaseError> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments \
             WHERE status = 'pending' AND expires_at <= $1 \
             ORDER BY expires_at ASC \
             LIMIT $2",
            PAYMENT_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let mut payments = Vec::with_capacity(rows.len());
        for row in rows {
            let sessions = self.load_sessions(row.id).await?;
            payments.push(payment_from_rows(row, sessions)?);
        }
        Ok(payments)
    }
}

/// Refund record tied one-to-one to a captured session. The refund write
/// path lives outside this service; the row shape is kept here because the
/// lifecycle reads it to decide refundability.
#[derive(Debug, Clone, FromRow)]
pub struct ProviderRefundRow {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub provider_session_id: Uuid,
    pub provider_refund_id: Option<String>,
    pub requested_amount: i64,
    pub requested_currency: String,
    pub idempotency_key: Uuid,
    pub provider_fee: Option<i64>,
    pub status: String,
    pub metadata: JsonValue,
}
