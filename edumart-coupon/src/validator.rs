use chrono::{DateTime, Utc};
use edumart_core::CouponRejection;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{Coupon, CouponScope};

/// Everything the validator needs to know about the place a code is being applied.
#[derive(Debug, Clone)]
pub struct CouponContext {
    /// Where the buyer entered the code: on a line (instructor) or on the order (system).
    pub scope: CouponScope,
    /// Item price for instructor coupons, post-instructor subtotal for system coupons.
    pub base_amount: Decimal,
    pub instructor_id: Option<Uuid>,
    pub course_id: Option<Uuid>,
    /// How many times this buyer has already used the coupon.
    pub user_usage_count: i64,
    pub now: DateTime<Utc>,
}

/// Pure eligibility rules. No I/O; callers look the coupon up and count prior usages.
pub struct CouponValidator;

impl CouponValidator {
    /// Runs the checks in a fixed order and returns the discount, or the first failing reason.
    pub fn evaluate(coupon: &Coupon, ctx: &CouponContext) -> Result<Decimal, CouponRejection> {
        if !coupon.is_active {
            return Err(CouponRejection::Inactive);
        }

        if ctx.now < coupon.valid_from {
            return Err(CouponRejection::NotYetValid);
        }
        if ctx.now > coupon.valid_to {
            return Err(CouponRejection::Expired);
        }

        if let Some(minimum) = coupon.min_order_amount {
            if ctx.base_amount < minimum {
                return Err(CouponRejection::BelowMinimum { minimum });
            }
        }

        if let Some(limit) = coupon.usage_limit {
            if coupon.used_count >= limit {
                return Err(CouponRejection::UsageLimitReached);
            }
        }

        if let Some(per_user) = coupon.usage_per_user {
            if ctx.user_usage_count >= i64::from(per_user) {
                return Err(CouponRejection::PerUserLimitReached);
            }
        }

        Self::check_scope(coupon, ctx)?;

        Ok(coupon.discount_for(ctx.base_amount))
    }

    fn check_scope(coupon: &Coupon, ctx: &CouponContext) -> Result<(), CouponRejection> {
        match (ctx.scope, coupon.scope()) {
            (CouponScope::System, CouponScope::System) => Ok(()),
            (CouponScope::System, CouponScope::Instructor) => Err(CouponRejection::ScopeMismatch(
                "this code belongs to an instructor, apply it to their course".into(),
            )),
            (CouponScope::Instructor, CouponScope::System) => Err(CouponRejection::ScopeMismatch(
                "this is a platform code, apply it to the whole order".into(),
            )),
            (CouponScope::Instructor, CouponScope::Instructor) => {
                if let Some(instructor_id) = coupon.applicable_instructor_id {
                    if ctx.instructor_id != Some(instructor_id) {
                        return Err(CouponRejection::ScopeMismatch(
                            "this code belongs to a different instructor".into(),
                        ));
                    }
                }
                if let Some(course_id) = coupon.applicable_course_id {
                    if ctx.course_id != Some(course_id) {
                        return Err(CouponRejection::ScopeMismatch(
                            "this code is for a different course".into(),
                        ));
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CouponType;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn instructor_coupon(instructor_id: Uuid) -> Coupon {
        let now = Utc::now();
        Coupon {
            id: Uuid::new_v4(),
            code: "LINH20".into(),
            description: None,
            coupon_type: CouponType::Percentage,
            value: dec!(20),
            min_order_amount: None,
            max_discount_amount: None,
            usage_limit: None,
            usage_per_user: None,
            used_count: 0,
            applicable_instructor_id: Some(instructor_id),
            applicable_course_id: None,
            valid_from: now - Duration::days(1),
            valid_to: now + Duration::days(1),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn line_ctx(instructor_id: Uuid, base: Decimal) -> CouponContext {
        CouponContext {
            scope: CouponScope::Instructor,
            base_amount: base,
            instructor_id: Some(instructor_id),
            course_id: Some(Uuid::new_v4()),
            user_usage_count: 0,
            now: Utc::now(),
        }
    }

    #[test]
    fn test_valid_instructor_coupon() {
        let instructor = Uuid::new_v4();
        let coupon = instructor_coupon(instructor);
        assert_eq!(
            CouponValidator::evaluate(&coupon, &line_ctx(instructor, dec!(500000))),
            Ok(dec!(100000))
        );
    }

    #[test]
    fn test_inactive_wins_over_everything() {
        let instructor = Uuid::new_v4();
        let mut coupon = instructor_coupon(instructor);
        coupon.is_active = false;
        coupon.valid_to = Utc::now() - Duration::days(1);
        assert_eq!(
            CouponValidator::evaluate(&coupon, &line_ctx(instructor, dec!(1))),
            Err(CouponRejection::Inactive)
        );
    }

    #[test]
    fn test_window_checked_before_minimum() {
        let instructor = Uuid::new_v4();
        let mut coupon = instructor_coupon(instructor);
        coupon.valid_to = Utc::now() - Duration::hours(1);
        coupon.min_order_amount = Some(dec!(1000000));
        assert_eq!(
            CouponValidator::evaluate(&coupon, &line_ctx(instructor, dec!(1))),
            Err(CouponRejection::Expired)
        );

        coupon.valid_from = Utc::now() + Duration::hours(1);
        coupon.valid_to = Utc::now() + Duration::days(2);
        assert_eq!(
            CouponValidator::evaluate(&coupon, &line_ctx(instructor, dec!(1))),
            Err(CouponRejection::NotYetValid)
        );
    }

    #[test]
    fn test_minimum_and_limits() {
        let instructor = Uuid::new_v4();
        let mut coupon = instructor_coupon(instructor);
        coupon.min_order_amount = Some(dec!(200000));
        assert_eq!(
            CouponValidator::evaluate(&coupon, &line_ctx(instructor, dec!(199999))),
            Err(CouponRejection::BelowMinimum { minimum: dec!(200000) })
        );

        coupon.min_order_amount = None;
        coupon.usage_limit = Some(3);
        coupon.used_count = 3;
        assert_eq!(
            CouponValidator::evaluate(&coupon, &line_ctx(instructor, dec!(1))),
            Err(CouponRejection::UsageLimitReached)
        );

        coupon.used_count = 0;
        coupon.usage_per_user = Some(1);
        let mut ctx = line_ctx(instructor, dec!(1));
        ctx.user_usage_count = 1;
        assert_eq!(
            CouponValidator::evaluate(&coupon, &ctx),
            Err(CouponRejection::PerUserLimitReached)
        );
    }

    #[test]
    fn test_scope_rules() {
        let instructor = Uuid::new_v4();
        let coupon = instructor_coupon(instructor);

        let other = line_ctx(Uuid::new_v4(), dec!(100));
        assert!(matches!(
            CouponValidator::evaluate(&coupon, &other),
            Err(CouponRejection::ScopeMismatch(_))
        ));

        let mut order_ctx = line_ctx(instructor, dec!(100));
        order_ctx.scope = CouponScope::System;
        assert!(matches!(
            CouponValidator::evaluate(&coupon, &order_ctx),
            Err(CouponRejection::ScopeMismatch(_))
        ));

        let mut system = instructor_coupon(instructor);
        system.applicable_instructor_id = None;
        assert!(matches!(
            CouponValidator::evaluate(&system, &line_ctx(instructor, dec!(100))),
            Err(CouponRejection::ScopeMismatch(_))
        ));
        assert!(CouponValidator::evaluate(&system, &order_ctx).is_ok());
    }

    #[test]
    fn test_course_scoped_coupon() {
        let instructor = Uuid::new_v4();
        let mut coupon = instructor_coupon(instructor);
        let course = Uuid::new_v4();
        coupon.applicable_course_id = Some(course);

        let mut ctx = line_ctx(instructor, dec!(100));
        assert!(CouponValidator::evaluate(&coupon, &ctx).is_err());
        ctx.course_id = Some(course);
        assert_eq!(CouponValidator::evaluate(&coupon, &ctx), Ok(dec!(20)));
    }
}
