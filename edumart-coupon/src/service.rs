use chrono::{DateTime, Utc};
use edumart_core::clock::Clock;
use edumart_core::{CoreError, CoreResult, CouponRejection};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{AppliedCoupon, Coupon, CouponScope, CouponUsage, NewCoupon};
use crate::repository::CouponRepository;
use crate::validator::{CouponContext, CouponValidator};

/// Where a code is being applied.
#[derive(Debug, Clone, Copy)]
pub struct CouponTarget {
    pub scope: CouponScope,
    pub base_amount: Decimal,
    pub instructor_id: Option<Uuid>,
    pub course_id: Option<Uuid>,
}

/// Validation front door plus the usage tracker.
pub struct CouponService {
    repo: Arc<dyn CouponRepository>,
    clock: Arc<dyn Clock>,
}

impl CouponService {
    pub fn new(repo: Arc<dyn CouponRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    pub async fn create_coupon(&self, input: NewCoupon) -> CoreResult<Coupon> {
        input.validate()?;
        let coupon = input.into_coupon(self.clock.now());
        self.repo.insert_coupon(&coupon).await?;
        info!("Coupon {} created ({:?} scope)", coupon.code, coupon.scope());
        Ok(coupon)
    }

    pub async fn get_by_code(&self, code: &str) -> CoreResult<Coupon> {
        let normalized = Coupon::normalize_code(code);
        self.repo
            .find_by_code(&normalized)
            .await?
            .ok_or_else(|| CoreError::not_found("Coupon", normalized))
    }

    pub async fn deactivate(&self, coupon_id: Uuid) -> CoreResult<()> {
        self.repo.set_active(coupon_id, false).await
    }

    /// Read-only eligibility check. Never touches usage counters.
    pub async fn evaluate(&self, code: &str, user_id: Uuid, target: CouponTarget) -> CoreResult<AppliedCoupon> {
        let normalized = Coupon::normalize_code(code);
        if normalized.is_empty() {
            return Err(CoreError::ValidationError("Coupon code is empty".into()));
        }

        let coupon = self
            .repo
            .find_by_code(&normalized)
            .await?
            .ok_or_else(|| CoreError::coupon(normalized.clone(), CouponRejection::NotFound))?;

        let user_usage_count = self.repo.count_user_usages(coupon.id, user_id).await?;
        let ctx = CouponContext {
            scope: target.scope,
            base_amount: target.base_amount,
            instructor_id: target.instructor_id,
            course_id: target.course_id,
            user_usage_count,
            now: self.clock.now(),
        };

        match CouponValidator::evaluate(&coupon, &ctx) {
            Ok(discount) => {
                debug!("Coupon {} applies: discount {}", coupon.code, discount);
                Ok(AppliedCoupon {
                    scope: target.scope,
                    coupon_id: coupon.id,
                    code: coupon.code,
                    discount_amount: discount,
                })
            }
            Err(reason) => {
                debug!("Coupon {} rejected: {}", coupon.code, reason);
                Err(CoreError::coupon(coupon.code, reason))
            }
        }
    }

    pub async fn usages_for_order(&self, order_id: Uuid) -> CoreResult<Vec<CouponUsage>> {
        self.repo.usages_for_order(order_id).await
    }

    /// Usage rows to record when an order is confirmed: one per distinct coupon.
    pub fn plan_usages(
        order_id: Uuid,
        user_id: Uuid,
        applied: &[AppliedCoupon],
        used_at: DateTime<Utc>,
    ) -> Vec<CouponUsage> {
        let mut usages: Vec<CouponUsage> = Vec::with_capacity(applied.len());
        for coupon in applied {
            match usages.iter_mut().find(|u| u.coupon_id == coupon.coupon_id) {
                Some(existing) => existing.discount_amount += coupon.discount_amount,
                None => usages.push(CouponUsage {
                    id: Uuid::new_v4(),
                    coupon_id: coupon.coupon_id,
                    user_id,
                    order_id,
                    discount_amount: coupon.discount_amount,
                    used_at,
                }),
            }
        }
        usages
    }
}
