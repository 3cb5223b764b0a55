use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edumart_core::{CoreError, CoreResult};
use edumart_coupon::{AppliedCoupon, CouponUsage};
use edumart_order::models::{Order, OrderEvent, OrderItem};
use edumart_order::repository::{OrderRepository, RefundPlan};
use edumart_shared::pii::Masked;
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use crate::coupon_repo::record_usages;
use crate::database::db_err;
use crate::wallet_repo::post_entries;

pub struct StoreOrderRepository {
    pool: PgPool,
}

impl StoreOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    order_number: String,
    status: String,
    subtotal: Decimal,
    subtotal_after_instructor_discount: Decimal,
    instructor_discount: Decimal,
    system_discount: Decimal,
    total_discount: Decimal,
    tax: Decimal,
    total: Decimal,
    currency: String,
    applied_coupons: Json<Vec<AppliedCoupon>>,
    paid_at: Option<DateTime<Utc>>,
    is_settled: bool,
    settled_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    refund_reason: Option<String>,
    client_ip: Option<String>,
    user_agent: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    course_id: Uuid,
    course_title: String,
    course_thumbnail: Option<String>,
    instructor_id: Uuid,
    instructor_name: String,
    original_price: Decimal,
    instructor_discount: Decimal,
    unit_price: Decimal,
    discount_percent: Decimal,
    system_discount: Decimal,
    line_total: Decimal,
    platform_fee_percent: Decimal,
    platform_fee_amount: Decimal,
    instructor_earnings: Decimal,
    instructor_coupon_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> CoreResult<Order> {
        Ok(Order {
            id: self.id,
            user_id: self.user_id,
            order_number: self.order_number,
            status: self.status.parse()?,
            subtotal: self.subtotal,
            subtotal_after_instructor_discount: self.subtotal_after_instructor_discount,
            instructor_discount: self.instructor_discount,
            system_discount: self.system_discount,
            total_discount: self.total_discount,
            tax: self.tax,
            total: self.total,
            currency: self.currency,
            applied_coupons: self.applied_coupons.0,
            paid_at: self.paid_at,
            is_settled: self.is_settled,
            settled_at: self.settled_at,
            refunded_at: self.refunded_at,
            refund_reason: self.refund_reason,
            client_ip: self.client_ip.map(Masked::new),
            user_agent: self.user_agent.map(Masked::new),
            notes: self.notes,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        OrderItem {
            id: row.id,
            order_id: row.order_id,
            course_id: row.course_id,
            course_title: row.course_title,
            course_thumbnail: row.course_thumbnail,
            instructor_id: row.instructor_id,
            instructor_name: row.instructor_name,
            original_price: row.original_price,
            instructor_discount: row.instructor_discount,
            unit_price: row.unit_price,
            discount_percent: row.discount_percent,
            system_discount: row.system_discount,
            line_total: row.line_total,
            platform_fee_percent: row.platform_fee_percent,
            platform_fee_amount: row.platform_fee_amount,
            instructor_earnings: row.instructor_earnings,
            instructor_coupon_id: row.instructor_coupon_id,
            created_at: row.created_at,
        }
    }
}

// ============================================================================
// Helpers shared with the payment and settlement repositories
// ============================================================================

async fn load_items(conn: &mut PgConnection, order_ids: &[Uuid]) -> CoreResult<HashMap<Uuid, Vec<OrderItem>>> {
    let rows = sqlx::query_as::<_, OrderItemRow>(
        "SELECT * FROM order_items WHERE order_id = ANY($1) ORDER BY created_at, id",
    )
    .bind(order_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;

    let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
    for row in rows {
        items.entry(row.order_id).or_default().push(row.into());
    }
    Ok(items)
}

/// Loads an order with its items. `for_update` takes a row lock for the rest of the transaction.
pub(crate) async fn load_order(conn: &mut PgConnection, order_id: Uuid, for_update: bool) -> CoreResult<Option<Order>> {
    let sql = if for_update {
        "SELECT * FROM orders WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT * FROM orders WHERE id = $1"
    };
    let Some(row) = sqlx::query_as::<_, OrderRow>(sql)
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?
    else {
        return Ok(None);
    };

    let mut items = load_items(conn, &[order_id]).await?;
    row.into_order(items.remove(&order_id).unwrap_or_default()).map(Some)
}

/// Writes the mutable lifecycle columns of an order.
pub(crate) async fn save_order_state(conn: &mut PgConnection, order: &Order) -> CoreResult<()> {
    sqlx::query(
        r#"
        UPDATE orders
        SET status = $2, paid_at = $3, is_settled = $4, settled_at = $5,
            refunded_at = $6, refund_reason = $7, updated_at = $8
        WHERE id = $1
        "#,
    )
    .bind(order.id)
    .bind(order.status.as_str())
    .bind(order.paid_at)
    .bind(order.is_settled)
    .bind(order.settled_at)
    .bind(order.refunded_at)
    .bind(&order.refund_reason)
    .bind(order.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn insert_item(conn: &mut PgConnection, item: &OrderItem) -> CoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO order_items (id, order_id, course_id, course_title, course_thumbnail, instructor_id,
            instructor_name, original_price, instructor_discount, unit_price, discount_percent, system_discount,
            line_total, platform_fee_percent, platform_fee_amount, instructor_earnings, instructor_coupon_id, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        "#,
    )
    .bind(item.id)
    .bind(item.order_id)
    .bind(item.course_id)
    .bind(&item.course_title)
    .bind(&item.course_thumbnail)
    .bind(item.instructor_id)
    .bind(&item.instructor_name)
    .bind(item.original_price)
    .bind(item.instructor_discount)
    .bind(item.unit_price)
    .bind(item.discount_percent)
    .bind(item.system_discount)
    .bind(item.line_total)
    .bind(item.platform_fee_percent)
    .bind(item.platform_fee_amount)
    .bind(item.instructor_earnings)
    .bind(item.instructor_coupon_id)
    .bind(item.created_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

#[async_trait]
impl OrderRepository for StoreOrderRepository {
    async fn insert_order(&self, order: &Order, usages: &[CouponUsage]) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, order_number, status, subtotal, subtotal_after_instructor_discount,
                instructor_discount, system_discount, total_discount, tax, total, currency, applied_coupons,
                paid_at, is_settled, settled_at, client_ip, user_agent, notes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(&order.order_number)
        .bind(order.status.as_str())
        .bind(order.subtotal)
        .bind(order.subtotal_after_instructor_discount)
        .bind(order.instructor_discount)
        .bind(order.system_discount)
        .bind(order.total_discount)
        .bind(order.tax)
        .bind(order.total)
        .bind(&order.currency)
        .bind(Json(&order.applied_coupons))
        .bind(order.paid_at)
        .bind(order.is_settled)
        .bind(order.settled_at)
        .bind(order.client_ip.as_ref().map(|ip| ip.expose().as_str()))
        .bind(order.user_agent.as_ref().map(|ua| ua.expose().as_str()))
        .bind(&order.notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for item in &order.items {
            insert_item(&mut tx, item).await?;
        }
        record_usages(&mut tx, usages).await?;

        tx.commit().await.map_err(db_err)?;
        info!("Order {} stored with {} items", order.order_number, order.items.len());
        Ok(())
    }

    async fn find_order(&self, order_id: Uuid) -> CoreResult<Option<Order>> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        load_order(&mut conn, order_id, false).await
    }

    async fn list_orders_for_user(&self, user_id: Uuid) -> CoreResult<Vec<Order>> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC")
            .bind(user_id)
            .fetch_all(&mut *conn)
            .await
            .map_err(db_err)?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut items = load_items(&mut conn, &ids).await?;
        rows.into_iter()
            .map(|row| {
                let lines = items.remove(&row.id).unwrap_or_default();
                row.into_order(lines)
            })
            .collect()
    }

    async fn purchased_course_ids(&self, user_id: Uuid, course_ids: &[Uuid]) -> CoreResult<Vec<Uuid>> {
        sqlx::query_scalar(
            r#"
            SELECT DISTINCT oi.course_id
            FROM order_items oi
            JOIN orders o ON o.id = oi.order_id
            WHERE o.user_id = $1 AND o.status = 'PAID' AND oi.course_id = ANY($2)
            ORDER BY oi.course_id
            "#,
        )
        .bind(user_id)
        .bind(course_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn cancel_order(&self, order_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> CoreResult<Order> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut order = load_order(&mut tx, order_id, true)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| CoreError::not_found("Order", order_id))?;
        order.apply(OrderEvent::Cancel, now)?;
        save_order_state(&mut tx, &order).await?;

        let expired = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'EXPIRED', failure_reason = 'Order cancelled', updated_at = $2
            WHERE order_id = $1 AND status IN ('PENDING', 'PROCESSING')
            "#,
        )
        .bind(order_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        info!(
            "Order {} cancelled, {} open payment(s) expired",
            order.order_number,
            expired.rows_affected()
        );
        Ok(order)
    }

    async fn refund_order(&self, plan: &RefundPlan) -> CoreResult<Order> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut order = load_order(&mut tx, plan.order_id, true)
            .await?
            .ok_or_else(|| CoreError::not_found("Order", plan.order_id))?;
        if order.is_settled {
            return Err(CoreError::Conflict(format!("Order {} is already settled", order.order_number)));
        }
        order.apply(OrderEvent::Refund, plan.refunded_at)?;
        order.refund_reason = Some(format!("{} ({})", plan.reason, plan.operator));

        post_entries(&mut tx, &plan.reversals, &order.currency, plan.refunded_at).await?;
        save_order_state(&mut tx, &order).await?;

        tx.commit().await.map_err(db_err)?;
        Ok(order)
    }
}
