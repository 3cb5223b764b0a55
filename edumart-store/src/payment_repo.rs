use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edumart_core::payment::{Payment, PaymentStatus};
use edumart_core::{CoreError, CoreResult};
use edumart_order::models::{OrderEvent, OrderStatus};
use edumart_order::repository::{PaymentConfirmation, PaymentOutcome, PaymentRepository, PaymentSlot};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::coupon_repo::record_usages;
use crate::database::db_err;
use crate::order_repo::{load_order, save_order_state};
use crate::wallet_repo::post_entries;

pub struct StorePaymentRepository {
    pool: PgPool,
}

impl StorePaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    order_id: Option<Uuid>,
    wallet_id: Option<Uuid>,
    payment_number: String,
    purpose: String,
    status: String,
    amount: Decimal,
    currency: String,
    provider: String,
    payment_method: Option<String>,
    bank_code: Option<String>,
    external_transaction_id: Option<String>,
    redirect_url: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = CoreError;

    fn try_from(row: PaymentRow) -> CoreResult<Self> {
        Ok(Payment {
            id: row.id,
            order_id: row.order_id,
            wallet_id: row.wallet_id,
            payment_number: row.payment_number,
            purpose: row.purpose.parse()?,
            status: row.status.parse()?,
            amount: row.amount,
            currency: row.currency,
            provider: row.provider,
            payment_method: row.payment_method,
            bank_code: row.bank_code,
            external_transaction_id: row.external_transaction_id,
            redirect_url: row.redirect_url,
            paid_at: row.paid_at,
            expires_at: row.expires_at,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

async fn insert(conn: &mut PgConnection, payment: &Payment) -> CoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO payments (id, order_id, wallet_id, payment_number, purpose, status, amount, currency, provider,
            payment_method, bank_code, external_transaction_id, redirect_url, paid_at, expires_at, failure_reason,
            created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        "#,
    )
    .bind(payment.id)
    .bind(payment.order_id)
    .bind(payment.wallet_id)
    .bind(&payment.payment_number)
    .bind(payment.purpose.as_str())
    .bind(payment.status.as_str())
    .bind(payment.amount)
    .bind(&payment.currency)
    .bind(&payment.provider)
    .bind(&payment.payment_method)
    .bind(&payment.bank_code)
    .bind(&payment.external_transaction_id)
    .bind(&payment.redirect_url)
    .bind(payment.paid_at)
    .bind(payment.expires_at)
    .bind(&payment.failure_reason)
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Writes every column a status change can touch.
async fn save(conn: &mut PgConnection, payment: &Payment) -> CoreResult<()> {
    sqlx::query(
        r#"
        UPDATE payments
        SET status = $2, payment_method = $3, bank_code = $4, external_transaction_id = $5,
            redirect_url = $6, paid_at = $7, failure_reason = $8, updated_at = $9
        WHERE id = $1
        "#,
    )
    .bind(payment.id)
    .bind(payment.status.as_str())
    .bind(&payment.payment_method)
    .bind(&payment.bank_code)
    .bind(&payment.external_transaction_id)
    .bind(&payment.redirect_url)
    .bind(payment.paid_at)
    .bind(&payment.failure_reason)
    .bind(payment.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn lock(conn: &mut PgConnection, payment_id: Uuid) -> CoreResult<Payment> {
    sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
        .bind(payment_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?
        .ok_or_else(|| CoreError::not_found("Payment", payment_id))?
        .try_into()
}

/// Outcome for a payment that can no longer change.
fn closed_outcome(payment: Payment) -> Result<PaymentOutcome, Payment> {
    match payment.status {
        PaymentStatus::Paid => Ok(PaymentOutcome::AlreadyPaid(payment)),
        PaymentStatus::Failed | PaymentStatus::Expired => Ok(PaymentOutcome::AlreadyClosed(payment)),
        PaymentStatus::Pending | PaymentStatus::Processing => Err(payment),
    }
}

#[async_trait]
impl PaymentRepository for StorePaymentRepository {
    async fn open_order_payment(
        &self,
        candidate: Payment,
        now: DateTime<Utc>,
        expiry_reason: &str,
    ) -> CoreResult<PaymentSlot> {
        let order_id = candidate
            .order_id
            .ok_or_else(|| CoreError::ValidationError("Order payment without an order".into()))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let (order_number, status): (String, String) =
            sqlx::query_as("SELECT order_number, status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(order_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?
                .ok_or_else(|| CoreError::not_found("Order", order_id))?;
        let status: OrderStatus = status.parse()?;
        if status != OrderStatus::Pending {
            return Err(CoreError::Conflict(format!("Order {} is {}", order_number, status)));
        }

        sqlx::query(
            r#"
            UPDATE payments
            SET status = 'EXPIRED', failure_reason = $3, updated_at = $2
            WHERE order_id = $1 AND status IN ('PENDING', 'PROCESSING') AND expires_at <= $2
            "#,
        )
        .bind(order_id)
        .bind(now)
        .bind(expiry_reason)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let active = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT * FROM payments
            WHERE order_id = $1 AND status IN ('PENDING', 'PROCESSING')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let slot = match active {
            Some(row) => PaymentSlot::Existing(row.try_into()?),
            None => {
                insert(&mut tx, &candidate).await?;
                PaymentSlot::Created(candidate)
            }
        };
        tx.commit().await.map_err(db_err)?;
        Ok(slot)
    }

    async fn insert_payment(&self, payment: &Payment) -> CoreResult<()> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        insert(&mut conn, payment).await
    }

    async fn save_redirect(&self, payment_id: Uuid, url: &str, now: DateTime<Utc>) -> CoreResult<Payment> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut payment = lock(&mut tx, payment_id).await?;
        if payment.mark_redirected(url.to_string(), now)? {
            save(&mut tx, &payment).await?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(payment)
    }

    async fn find_payment(&self, payment_id: Uuid) -> CoreResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE id = $1")
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn find_by_number(&self, payment_number: &str) -> CoreResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE payment_number = $1")
            .bind(payment_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn payments_for_order(&self, order_id: Uuid) -> CoreResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE order_id = $1 ORDER BY created_at DESC")
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn confirm_payment(&self, confirmation: &PaymentConfirmation) -> CoreResult<PaymentOutcome> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut payment = match closed_outcome(lock(&mut tx, confirmation.payment_id).await?) {
            Ok(outcome) => return Ok(outcome),
            Err(open) => open,
        };

        let paid_at = confirmation.receipt.paid_at;
        payment.mark_paid(&confirmation.receipt)?;

        if let Some(order_id) = confirmation.order_id {
            let mut order = load_order(&mut tx, order_id, true)
                .await?
                .ok_or_else(|| CoreError::not_found("Order", order_id))?;
            order.apply(OrderEvent::PaymentConfirmed, paid_at)?;
            save_order_state(&mut tx, &order).await?;
        }

        record_usages(&mut tx, &confirmation.coupon_usages).await?;
        post_entries(&mut tx, &confirmation.ledger_entries, &payment.currency, paid_at).await?;
        save(&mut tx, &payment).await?;

        tx.commit().await.map_err(db_err)?;
        info!("Payment {} confirmed", payment.payment_number);
        Ok(PaymentOutcome::Applied(payment))
    }

    async fn fail_payment(
        &self,
        payment_id: Uuid,
        reason: &str,
        transaction_no: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoreResult<PaymentOutcome> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut payment = match closed_outcome(lock(&mut tx, payment_id).await?) {
            Ok(outcome) => return Ok(outcome),
            Err(open) => open,
        };
        payment.mark_failed(reason.to_string(), transaction_no.map(str::to_string), now)?;
        save(&mut tx, &payment).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(PaymentOutcome::Applied(payment))
    }

    async fn expire_payment(&self, payment_id: Uuid, reason: &str, now: DateTime<Utc>) -> CoreResult<PaymentOutcome> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut payment = match closed_outcome(lock(&mut tx, payment_id).await?) {
            Ok(outcome) => return Ok(outcome),
            Err(open) => open,
        };
        payment.mark_expired(reason.to_string(), now)?;
        save(&mut tx, &payment).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(PaymentOutcome::Applied(payment))
    }

    async fn expire_stale_payments(&self, now: DateTime<Utc>, reason: &str) -> CoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'EXPIRED', failure_reason = $2, updated_at = $1
            WHERE status IN ('PENDING', 'PROCESSING') AND expires_at <= $1
            "#,
        )
        .bind(now)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
