use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edumart_core::{CoreError, CoreResult, CouponRejection};
use edumart_coupon::{Coupon, CouponRepository, CouponType, CouponUsage};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use tracing::warn;
use uuid::Uuid;

use crate::database::db_err;

pub struct StoreCouponRepository {
    pool: PgPool,
}

impl StoreCouponRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CouponRow {
    id: Uuid,
    code: String,
    description: Option<String>,
    coupon_type: String,
    value: Decimal,
    min_order_amount: Option<Decimal>,
    max_discount_amount: Option<Decimal>,
    usage_limit: Option<i32>,
    usage_per_user: Option<i32>,
    used_count: i32,
    applicable_instructor_id: Option<Uuid>,
    applicable_course_id: Option<Uuid>,
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = CoreError;

    fn try_from(row: CouponRow) -> CoreResult<Self> {
        Ok(Coupon {
            id: row.id,
            code: row.code,
            description: row.description,
            coupon_type: CouponType::parse(&row.coupon_type)?,
            value: row.value,
            min_order_amount: row.min_order_amount,
            max_discount_amount: row.max_discount_amount,
            usage_limit: row.usage_limit,
            usage_per_user: row.usage_per_user,
            used_count: row.used_count,
            applicable_instructor_id: row.applicable_instructor_id,
            applicable_course_id: row.applicable_course_id,
            valid_from: row.valid_from,
            valid_to: row.valid_to,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UsageRow {
    id: Uuid,
    coupon_id: Uuid,
    user_id: Uuid,
    order_id: Uuid,
    discount_amount: Decimal,
    used_at: DateTime<Utc>,
}

impl From<UsageRow> for CouponUsage {
    fn from(row: UsageRow) -> Self {
        CouponUsage {
            id: row.id,
            coupon_id: row.coupon_id,
            user_id: row.user_id,
            order_id: row.order_id,
            discount_amount: row.discount_amount,
            used_at: row.used_at,
        }
    }
}

/// Claims one usage slot per entry inside the caller's transaction. The global limit is a
/// conditional increment; the per-user limit is recounted while that update holds the coupon row
/// lock. Any refusal leaves the transaction to be rolled back by the caller.
pub(crate) async fn record_usages(conn: &mut PgConnection, usages: &[CouponUsage]) -> CoreResult<()> {
    for usage in usages {
        let claimed: Option<(String, Option<i32>)> = sqlx::query_as(
            r#"
            UPDATE coupons
            SET used_count = used_count + 1, updated_at = $2
            WHERE id = $1 AND (usage_limit IS NULL OR used_count < usage_limit)
            RETURNING code, usage_per_user
            "#,
        )
        .bind(usage.coupon_id)
        .bind(usage.used_at)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;

        let Some((code, usage_per_user)) = claimed else {
            let code: Option<String> = sqlx::query_scalar("SELECT code FROM coupons WHERE id = $1")
                .bind(usage.coupon_id)
                .fetch_optional(&mut *conn)
                .await
                .map_err(db_err)?;
            return Err(match code {
                Some(code) => {
                    warn!("Coupon {} hit its usage limit at confirmation", code);
                    CoreError::coupon(code, CouponRejection::UsageLimitReached)
                }
                None => CoreError::coupon(usage.coupon_id.to_string(), CouponRejection::NotFound),
            });
        };

        if let Some(per_user) = usage_per_user {
            let prior: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM coupon_usages WHERE coupon_id = $1 AND user_id = $2")
                    .bind(usage.coupon_id)
                    .bind(usage.user_id)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(db_err)?;
            if prior >= i64::from(per_user) {
                warn!("Coupon {} already used {} time(s) by user {}", code, prior, usage.user_id);
                return Err(CoreError::coupon(code, CouponRejection::PerUserLimitReached));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO coupon_usages (id, coupon_id, user_id, order_id, discount_amount, used_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(usage.id)
        .bind(usage.coupon_id)
        .bind(usage.user_id)
        .bind(usage.order_id)
        .bind(usage.discount_amount)
        .bind(usage.used_at)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}

#[async_trait]
impl CouponRepository for StoreCouponRepository {
    async fn insert_coupon(&self, coupon: &Coupon) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO coupons (id, code, description, coupon_type, value, min_order_amount, max_discount_amount,
                usage_limit, usage_per_user, used_count, applicable_instructor_id, applicable_course_id,
                valid_from, valid_to, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(coupon.id)
        .bind(&coupon.code)
        .bind(&coupon.description)
        .bind(coupon.coupon_type.as_str())
        .bind(coupon.value)
        .bind(coupon.min_order_amount)
        .bind(coupon.max_discount_amount)
        .bind(coupon.usage_limit)
        .bind(coupon.usage_per_user)
        .bind(coupon.used_count)
        .bind(coupon.applicable_instructor_id)
        .bind(coupon.applicable_course_id)
        .bind(coupon.valid_from)
        .bind(coupon.valid_to)
        .bind(coupon.is_active)
        .bind(coupon.created_at)
        .bind(coupon.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match db_err(e) {
            CoreError::Conflict(_) => CoreError::Conflict(format!("Coupon code {} is taken", coupon.code)),
            other => other,
        })?;
        Ok(())
    }

    async fn find_by_code(&self, code: &str) -> CoreResult<Option<Coupon>> {
        sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Coupon::try_from)
            .transpose()
    }

    async fn find_coupon(&self, coupon_id: Uuid) -> CoreResult<Option<Coupon>> {
        sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons WHERE id = $1")
            .bind(coupon_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Coupon::try_from)
            .transpose()
    }

    async fn count_user_usages(&self, coupon_id: Uuid, user_id: Uuid) -> CoreResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM coupon_usages WHERE coupon_id = $1 AND user_id = $2")
            .bind(coupon_id)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn usages_for_order(&self, order_id: Uuid) -> CoreResult<Vec<CouponUsage>> {
        let rows = sqlx::query_as::<_, UsageRow>("SELECT * FROM coupon_usages WHERE order_id = $1 ORDER BY used_at")
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(CouponUsage::from).collect())
    }

    async fn set_active(&self, coupon_id: Uuid, active: bool) -> CoreResult<()> {
        let result = sqlx::query("UPDATE coupons SET is_active = $2, updated_at = NOW() WHERE id = $1")
            .bind(coupon_id)
            .bind(active)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("Coupon", coupon_id));
        }
        Ok(())
    }
}
