use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edumart_core::{CoreError, CoreResult};
use edumart_order::models::OrderStatus;
use edumart_order::repository::{SettlementOutcome, SettlementPlan, SettlementRecord, SettlementRepository};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::db_err;
use crate::order_repo::load_order;
use crate::wallet_repo::post_entries;

pub struct StoreSettlementRepository {
    pool: PgPool,
}

impl StoreSettlementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SettlementRow {
    id: Uuid,
    order_id: Uuid,
    forced: bool,
    operator: Option<String>,
    reason: Option<String>,
    instructor_total: Decimal,
    platform_total: Decimal,
    settled_at: DateTime<Utc>,
}

impl From<SettlementRow> for SettlementRecord {
    fn from(row: SettlementRow) -> Self {
        SettlementRecord {
            id: row.id,
            order_id: row.order_id,
            forced: row.forced,
            operator: row.operator,
            reason: row.reason,
            instructor_total: row.instructor_total,
            platform_total: row.platform_total,
            settled_at: row.settled_at,
        }
    }
}

#[async_trait]
impl SettlementRepository for StoreSettlementRepository {
    async fn due_for_settlement(&self, paid_before: DateTime<Utc>, exclude: &[Uuid], limit: i64) -> CoreResult<Vec<Uuid>> {
        sqlx::query_scalar(
            r#"
            SELECT id FROM orders
            WHERE status = 'PAID' AND is_settled = FALSE AND paid_at <= $1
              AND NOT (id = ANY($2))
            ORDER BY paid_at
            LIMIT $3
            "#,
        )
        .bind(paid_before)
        .bind(exclude.to_vec())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn settle_order(&self, plan: &SettlementPlan) -> CoreResult<SettlementOutcome> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // The claim: only one caller flips the flag, a concurrent sweep gets zero rows.
        let claimed: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE orders
            SET is_settled = TRUE, settled_at = $2, updated_at = $2
            WHERE id = $1 AND is_settled = FALSE AND status = 'PAID'
              AND ($3::timestamptz IS NULL OR paid_at <= $3)
            RETURNING currency
            "#,
        )
        .bind(plan.order_id)
        .bind(plan.settled_at)
        .bind(plan.paid_before)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(currency) = claimed else {
            let order = load_order(&mut tx, plan.order_id, false)
                .await?
                .ok_or_else(|| CoreError::not_found("Order", plan.order_id))?;
            return Ok(if order.is_settled {
                SettlementOutcome::AlreadySettled
            } else if order.status != OrderStatus::Paid {
                SettlementOutcome::NotEligible(format!("order is {}", order.status))
            } else {
                SettlementOutcome::NotEligible("still inside the hold period".into())
            });
        };

        post_entries(&mut tx, &plan.entries, &currency, plan.settled_at).await?;

        let record = SettlementRecord {
            id: Uuid::new_v4(),
            order_id: plan.order_id,
            forced: plan.forced,
            operator: plan.operator.clone(),
            reason: plan.reason.clone(),
            instructor_total: plan.instructor_total,
            platform_total: plan.platform_total,
            settled_at: plan.settled_at,
        };
        sqlx::query(
            r#"
            INSERT INTO settlements (id, order_id, forced, operator, reason, instructor_total, platform_total, settled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.order_id)
        .bind(record.forced)
        .bind(&record.operator)
        .bind(&record.reason)
        .bind(record.instructor_total)
        .bind(record.platform_total)
        .bind(record.settled_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(SettlementOutcome::Settled(record))
    }

    async fn settlement_record(&self, order_id: Uuid) -> CoreResult<Option<SettlementRecord>> {
        Ok(sqlx::query_as::<_, SettlementRow>("SELECT * FROM settlements WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(SettlementRecord::from))
    }
}
