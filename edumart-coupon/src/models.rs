use chrono::{DateTime, Utc};
use edumart_core::{CoreError, CoreResult, CouponRejection};
use edumart_shared::money::{percent_of, round_money};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponType {
    Percentage,
    FixedAmount,
}

impl CouponType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CouponType::Percentage => "PERCENTAGE",
            CouponType::FixedAmount => "FIXED_AMOUNT",
        }
    }

    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "PERCENTAGE" => Ok(CouponType::Percentage),
            "FIXED_AMOUNT" => Ok(CouponType::FixedAmount),
            other => Err(CoreError::InternalError(format!("Unknown coupon type {}", other))),
        }
    }
}

/// Instructor coupons discount one line; system coupons discount the whole order after
/// instructor discounts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponScope {
    Instructor,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub description: Option<String>,
    pub coupon_type: CouponType,
    pub value: Decimal,
    pub min_order_amount: Option<Decimal>,
    pub max_discount_amount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub usage_per_user: Option<i32>,
    pub used_count: i32,
    pub applicable_instructor_id: Option<Uuid>,
    pub applicable_course_id: Option<Uuid>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Coupon {
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn scope(&self) -> CouponScope {
        if self.applicable_instructor_id.is_some() || self.applicable_course_id.is_some() {
            CouponScope::Instructor
        } else {
            CouponScope::System
        }
    }

    /// Discount against `base`. Percentages honour `max_discount_amount`; nothing ever
    /// exceeds `base`.
    pub fn discount_for(&self, base: Decimal) -> Decimal {
        if base <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let raw = match self.coupon_type {
            CouponType::Percentage => {
                let amount = percent_of(base, self.value);
                match self.max_discount_amount {
                    Some(cap) => amount.min(cap),
                    None => amount,
                }
            }
            CouponType::FixedAmount => round_money(self.value),
        };
        raw.min(base).max(Decimal::ZERO)
    }

    /// Claims one usage slot. `user_usages` is the buyer's count of earlier usages.
    /// Storage calls this (or its SQL twin) under the confirmation transaction.
    pub fn try_consume(&mut self, user_usages: i64) -> Result<(), CouponRejection> {
        if let Some(limit) = self.usage_limit {
            if self.used_count >= limit {
                return Err(CouponRejection::UsageLimitReached);
            }
        }
        if let Some(per_user) = self.usage_per_user {
            if user_usages >= i64::from(per_user) {
                return Err(CouponRejection::PerUserLimitReached);
            }
        }
        self.used_count += 1;
        Ok(())
    }
}

/// Input for creating a coupon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCoupon {
    pub code: String,
    pub description: Option<String>,
    pub coupon_type: CouponType,
    pub value: Decimal,
    pub min_order_amount: Option<Decimal>,
    pub max_discount_amount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub usage_per_user: Option<i32>,
    pub applicable_instructor_id: Option<Uuid>,
    pub applicable_course_id: Option<Uuid>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

impl NewCoupon {
    pub fn validate(&self) -> CoreResult<()> {
        if Coupon::normalize_code(&self.code).is_empty() {
            return Err(CoreError::ValidationError("Coupon code is required".into()));
        }
        match self.coupon_type {
            CouponType::Percentage if self.value <= Decimal::ZERO || self.value > Decimal::ONE_HUNDRED => {
                return Err(CoreError::ValidationError(
                    "Percentage coupons need a value in (0, 100]".into(),
                ));
            }
            CouponType::FixedAmount if self.value <= Decimal::ZERO => {
                return Err(CoreError::ValidationError("Fixed coupons need a positive value".into()));
            }
            _ => {}
        }
        if self.valid_from >= self.valid_to {
            return Err(CoreError::ValidationError("valid_from must be before valid_to".into()));
        }
        for (name, limit) in [("usage_limit", self.usage_limit), ("usage_per_user", self.usage_per_user)] {
            if matches!(limit, Some(n) if n <= 0) {
                return Err(CoreError::ValidationError(format!("{} must be positive", name)));
            }
        }
        for (name, amount) in [
            ("min_order_amount", self.min_order_amount),
            ("max_discount_amount", self.max_discount_amount),
        ] {
            if matches!(amount, Some(a) if a < Decimal::ZERO) {
                return Err(CoreError::ValidationError(format!("{} cannot be negative", name)));
            }
        }
        Ok(())
    }

    pub fn into_coupon(self, now: DateTime<Utc>) -> Coupon {
        Coupon {
            id: Uuid::new_v4(),
            code: Coupon::normalize_code(&self.code),
            description: self.description,
            coupon_type: self.coupon_type,
            value: self.value,
            min_order_amount: self.min_order_amount,
            max_discount_amount: self.max_discount_amount,
            usage_limit: self.usage_limit,
            usage_per_user: self.usage_per_user,
            used_count: 0,
            applicable_instructor_id: self.applicable_instructor_id,
            applicable_course_id: self.applicable_course_id,
            valid_from: self.valid_from,
            valid_to: self.valid_to,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A discount that made it onto an order. Kept on the order itself so auditing never needs
/// the coupon table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppliedCoupon {
    pub scope: CouponScope,
    pub coupon_id: Uuid,
    pub code: String,
    pub discount_amount: Decimal,
}

/// One completed use of a coupon. Unique per `(coupon_id, order_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CouponUsage {
    pub id: Uuid,
    pub coupon_id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub discount_amount: Decimal,
    pub used_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn coupon(coupon_type: CouponType, value: Decimal) -> Coupon {
        let now = Utc::now();
        NewCoupon {
            code: " spring20 ".into(),
            description: None,
            coupon_type,
            value,
            min_order_amount: None,
            max_discount_amount: None,
            usage_limit: None,
            usage_per_user: None,
            applicable_instructor_id: None,
            applicable_course_id: None,
            valid_from: now - Duration::days(1),
            valid_to: now + Duration::days(1),
        }
        .into_coupon(now)
    }

    #[test]
    fn test_code_is_normalized() {
        assert_eq!(coupon(CouponType::Percentage, dec!(20)).code, "SPRING20");
    }

    #[test]
    fn test_percentage_discount_respects_cap() {
        let mut c = coupon(CouponType::Percentage, dec!(20));
        assert_eq!(c.discount_for(dec!(500000)), dec!(100000));
        c.max_discount_amount = Some(dec!(60000));
        assert_eq!(c.discount_for(dec!(500000)), dec!(60000));
    }

    #[test]
    fn test_fixed_discount_never_exceeds_base() {
        let c = coupon(CouponType::FixedAmount, dec!(50000));
        assert_eq!(c.discount_for(dec!(400000)), dec!(50000));
        assert_eq!(c.discount_for(dec!(30000)), dec!(30000));
        assert_eq!(c.discount_for(dec!(0)), dec!(0));
    }

    #[test]
    fn test_try_consume_enforces_limits() {
        let mut c = coupon(CouponType::FixedAmount, dec!(1));
        c.usage_limit = Some(1);
        c.usage_per_user = Some(1);
        assert_eq!(c.try_consume(1), Err(CouponRejection::PerUserLimitReached));
        assert_eq!(c.used_count, 0);
        assert!(c.try_consume(0).is_ok());
        assert_eq!(c.try_consume(0), Err(CouponRejection::UsageLimitReached));
        assert_eq!(c.used_count, 1);
    }

    #[test]
    fn test_new_coupon_validation() {
        let now = Utc::now();
        let mut input = NewCoupon {
            code: "BIG".into(),
            description: None,
            coupon_type: CouponType::Percentage,
            value: dec!(120),
            min_order_amount: None,
            max_discount_amount: None,
            usage_limit: None,
            usage_per_user: None,
            applicable_instructor_id: None,
            applicable_course_id: None,
            valid_from: now,
            valid_to: now + Duration::days(3),
        };
        assert!(input.validate().is_err());
        input.value = dec!(100);
        assert!(input.validate().is_ok());
        input.valid_to = now;
        assert!(input.validate().is_err());
    }
}
