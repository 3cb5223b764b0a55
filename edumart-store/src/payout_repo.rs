use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edumart_core::wallet::WalletTransaction;
use edumart_core::{CoreError, CoreResult};
use edumart_order::repository::PayoutRepository;
use edumart_order::PayoutRequest;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::database::db_err;
use crate::wallet_repo::post_entries;

pub struct StorePayoutRepository {
    pool: PgPool,
}

impl StorePayoutRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PayoutRow {
    id: Uuid,
    instructor_id: Uuid,
    wallet_id: Uuid,
    request_number: String,
    amount: Decimal,
    currency: String,
    status: String,
    bank_name: String,
    bank_account_number: String,
    bank_account_name: String,
    note: Option<String>,
    requested_at: DateTime<Utc>,
    approved_by: Option<Uuid>,
    approved_at: Option<DateTime<Utc>>,
    rejected_by: Option<Uuid>,
    rejected_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PayoutRow> for PayoutRequest {
    type Error = CoreError;

    fn try_from(row: PayoutRow) -> CoreResult<Self> {
        Ok(PayoutRequest {
            id: row.id,
            instructor_id: row.instructor_id,
            wallet_id: row.wallet_id,
            request_number: row.request_number,
            amount: row.amount,
            currency: row.currency,
            status: row.status.parse()?,
            bank_name: row.bank_name,
            bank_account_number: row.bank_account_number,
            bank_account_name: row.bank_account_name,
            note: row.note,
            requested_at: row.requested_at,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            rejected_by: row.rejected_by,
            rejected_at: row.rejected_at,
            rejection_reason: row.rejection_reason,
            updated_at: row.updated_at,
        })
    }
}

async fn lock(conn: &mut PgConnection, payout_id: Uuid) -> CoreResult<PayoutRequest> {
    sqlx::query_as::<_, PayoutRow>("SELECT * FROM payout_requests WHERE id = $1 FOR UPDATE")
        .bind(payout_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?
        .ok_or_else(|| CoreError::not_found("Payout", payout_id))?
        .try_into()
}

async fn save_review(conn: &mut PgConnection, payout: &PayoutRequest) -> CoreResult<()> {
    sqlx::query(
        r#"
        UPDATE payout_requests
        SET status = $2, approved_by = $3, approved_at = $4, rejected_by = $5, rejected_at = $6,
            rejection_reason = $7, updated_at = $8
        WHERE id = $1
        "#,
    )
    .bind(payout.id)
    .bind(payout.status.as_str())
    .bind(payout.approved_by)
    .bind(payout.approved_at)
    .bind(payout.rejected_by)
    .bind(payout.rejected_at)
    .bind(&payout.rejection_reason)
    .bind(payout.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

#[async_trait]
impl PayoutRepository for StorePayoutRepository {
    async fn insert_payout(&self, payout: &PayoutRequest) -> CoreResult<()> {
        // idx_payout_requests_awaiting turns a second open request into a unique violation.
        sqlx::query(
            r#"
            INSERT INTO payout_requests
                (id, instructor_id, wallet_id, request_number, amount, currency, status, bank_name,
                 bank_account_number, bank_account_name, note, requested_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(payout.id)
        .bind(payout.instructor_id)
        .bind(payout.wallet_id)
        .bind(&payout.request_number)
        .bind(payout.amount)
        .bind(&payout.currency)
        .bind(payout.status.as_str())
        .bind(&payout.bank_name)
        .bind(&payout.bank_account_number)
        .bind(&payout.bank_account_name)
        .bind(&payout.note)
        .bind(payout.requested_at)
        .bind(payout.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match db_err(e) {
            CoreError::Conflict(_) => CoreError::Conflict(format!(
                "Instructor {} already has a payout request awaiting review",
                payout.instructor_id
            )),
            other => other,
        })?;
        Ok(())
    }

    async fn find_payout(&self, payout_id: Uuid) -> CoreResult<Option<PayoutRequest>> {
        sqlx::query_as::<_, PayoutRow>("SELECT * FROM payout_requests WHERE id = $1")
            .bind(payout_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(PayoutRequest::try_from)
            .transpose()
    }

    async fn list_payouts(&self, instructor_id: Option<Uuid>, limit: i64) -> CoreResult<Vec<PayoutRequest>> {
        let rows = sqlx::query_as::<_, PayoutRow>(
            r#"
            SELECT * FROM payout_requests
            WHERE $1::uuid IS NULL OR instructor_id = $1
            ORDER BY requested_at DESC
            LIMIT $2
            "#,
        )
        .bind(instructor_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(PayoutRequest::try_from).collect()
    }

    async fn approve_payout(
        &self,
        payout_id: Uuid,
        admin_id: Uuid,
        now: DateTime<Utc>,
    ) -> CoreResult<(PayoutRequest, WalletTransaction)> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut payout = lock(&mut tx, payout_id).await?;

        let debit = payout.approve(admin_id, now)?;
        let posted = post_entries(&mut tx, std::slice::from_ref(&debit), &payout.currency, now)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::InternalError("Posting produced no transaction".into()))?;
        save_review(&mut tx, &payout).await?;

        tx.commit().await.map_err(db_err)?;
        Ok((payout, posted))
    }

    async fn reject_payout(
        &self,
        payout_id: Uuid,
        admin_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<PayoutRequest> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut payout = lock(&mut tx, payout_id).await?;
        payout.reject(admin_id, reason, now)?;
        save_review(&mut tx, &payout).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(payout)
    }
}
