use edumart_catalog::{CatalogClient, CourseSnapshot};
use edumart_core::{CoreError, CoreResult};
use edumart_coupon::service::CouponTarget;
use edumart_coupon::{AppliedCoupon, CouponScope, CouponService};
use edumart_shared::money::{allocate_proportionally, percent_of, round_money};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Share of each line kept by the platform, in percent.
    pub platform_fee_percent: Decimal,
    /// Fraction applied to the discounted subtotal. Zero today.
    pub tax_rate: Decimal,
    pub currency: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            platform_fee_percent: Decimal::from(30),
            tax_rate: Decimal::ZERO,
            currency: "VND".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutLine {
    pub course_id: Uuid,
    pub instructor_coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub items: Vec<CheckoutLine>,
    pub system_coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PricedLine {
    pub course: CourseSnapshot,
    pub original_price: Decimal,
    pub instructor_discount: Decimal,
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
    pub system_discount: Decimal,
    pub line_total: Decimal,
    pub platform_fee_percent: Decimal,
    pub platform_fee_amount: Decimal,
    pub instructor_earnings: Decimal,
    pub instructor_coupon: Option<AppliedCoupon>,
}

/// Immutable result of pricing a checkout.
#[derive(Debug, Clone, Serialize)]
pub struct PriceBreakdown {
    pub lines: Vec<PricedLine>,
    pub subtotal: Decimal,
    pub subtotal_after_instructor_discount: Decimal,
    pub instructor_discount: Decimal,
    pub system_discount: Decimal,
    pub total_discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub applied_coupons: Vec<AppliedCoupon>,
}

/// Composes catalog prices with instructor and system coupons.
pub struct PricingEngine {
    config: PricingConfig,
    catalog: Arc<dyn CatalogClient>,
    coupons: Arc<CouponService>,
}

impl PricingEngine {
    pub fn new(config: PricingConfig, catalog: Arc<dyn CatalogClient>, coupons: Arc<CouponService>) -> Self {
        Self {
            config,
            catalog,
            coupons,
        }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// Price a checkout. Reads only: no persistence, no coupon usage.
    pub async fn quote(&self, user_id: Uuid, request: &CheckoutRequest) -> CoreResult<PriceBreakdown> {
        if request.items.is_empty() {
            return Err(CoreError::ValidationError("Order must contain at least one course".into()));
        }
        let mut seen = HashSet::new();
        for line in &request.items {
            if !seen.insert(line.course_id) {
                return Err(CoreError::ValidationError(format!(
                    "Course {} appears more than once",
                    line.course_id
                )));
            }
        }

        let mut lines = Vec::with_capacity(request.items.len());
        for line in &request.items {
            let course = self
                .catalog
                .get_course(line.course_id)
                .await?
                .ok_or_else(|| CoreError::not_found("Course", line.course_id))?;

            if !course.is_purchasable() {
                return Err(CoreError::ValidationError(format!(
                    "Course '{}' is not available for purchase",
                    course.title
                )));
            }
            if course.instructor_id == user_id {
                return Err(CoreError::ValidationError(format!(
                    "You cannot buy your own course '{}'",
                    course.title
                )));
            }

            let instructor_coupon = match non_blank(&line.instructor_coupon_code) {
                Some(code) => {
                    let target = CouponTarget {
                        scope: CouponScope::Instructor,
                        base_amount: course.original_price,
                        instructor_id: Some(course.instructor_id),
                        course_id: Some(course.id),
                    };
                    Some(self.coupons.evaluate(code, user_id, target).await?)
                }
                None => None,
            };
            lines.push((course, instructor_coupon));
        }

        let after_instructor: Decimal = lines
            .iter()
            .map(|(course, coupon)| course.original_price - coupon.as_ref().map_or(Decimal::ZERO, |c| c.discount_amount))
            .sum();

        let system_coupon = match non_blank(&request.system_coupon_code) {
            Some(code) => {
                let target = CouponTarget {
                    scope: CouponScope::System,
                    base_amount: after_instructor,
                    instructor_id: None,
                    course_id: None,
                };
                Some(self.coupons.evaluate(code, user_id, target).await?)
            }
            None => None,
        };

        Ok(compose(&self.config, lines, system_coupon))
    }
}

fn non_blank(code: &Option<String>) -> Option<&str> {
    code.as_deref().map(str::trim).filter(|c| !c.is_empty())
}

/// Pure arithmetic of a quote. Discounts are clamped so nothing goes below zero; the system
/// discount is spread over lines in proportion to their post-instructor price.
pub fn compose(
    config: &PricingConfig,
    lines: Vec<(CourseSnapshot, Option<AppliedCoupon>)>,
    system_coupon: Option<AppliedCoupon>,
) -> PriceBreakdown {
    let mut instructor_coupons: Vec<AppliedCoupon> = Vec::new();
    let mut unit_prices = Vec::with_capacity(lines.len());
    let mut staged = Vec::with_capacity(lines.len());

    for (course, coupon) in lines {
        let original_price = round_money(course.original_price);
        let instructor_discount = coupon
            .as_ref()
            .map_or(Decimal::ZERO, |c| c.discount_amount)
            .min(original_price)
            .max(Decimal::ZERO);
        let coupon = coupon
            .map(|mut c| {
                c.discount_amount = instructor_discount;
                c
            })
            .filter(|c| c.discount_amount > Decimal::ZERO);

        if let Some(applied) = &coupon {
            match instructor_coupons.iter_mut().find(|c| c.coupon_id == applied.coupon_id) {
                Some(existing) => existing.discount_amount += applied.discount_amount,
                None => instructor_coupons.push(applied.clone()),
            }
        }

        let unit_price = original_price - instructor_discount;
        unit_prices.push(unit_price);
        staged.push((course, original_price, instructor_discount, unit_price, coupon));
    }

    let subtotal: Decimal = staged.iter().map(|s| s.1).sum();
    let instructor_discount: Decimal = staged.iter().map(|s| s.2).sum();
    let subtotal_after_instructor_discount = subtotal - instructor_discount;

    let system_coupon = system_coupon
        .map(|mut c| {
            c.discount_amount = c
                .discount_amount
                .min(subtotal_after_instructor_discount)
                .max(Decimal::ZERO);
            c
        })
        .filter(|c| c.discount_amount > Decimal::ZERO);
    let system_discount = system_coupon.as_ref().map_or(Decimal::ZERO, |c| c.discount_amount);
    let shares = allocate_proportionally(system_discount, &unit_prices);

    let lines: Vec<PricedLine> = staged
        .into_iter()
        .zip(shares)
        .map(|((course, original_price, instructor_discount, unit_price, coupon), share)| {
            let line_total = unit_price - share;
            let platform_fee_amount = percent_of(line_total, config.platform_fee_percent);
            let discount_percent = if original_price > Decimal::ZERO {
                round_money(instructor_discount * Decimal::ONE_HUNDRED / original_price)
            } else {
                Decimal::ZERO
            };
            PricedLine {
                course,
                original_price,
                instructor_discount,
                unit_price,
                discount_percent,
                system_discount: share,
                line_total,
                platform_fee_percent: config.platform_fee_percent,
                platform_fee_amount,
                instructor_earnings: line_total - platform_fee_amount,
                instructor_coupon: coupon,
            }
        })
        .collect();

    let total_discount = instructor_discount + system_discount;
    let tax = round_money((subtotal - total_discount) * config.tax_rate);
    let total = subtotal - total_discount + tax;

    let mut applied_coupons = instructor_coupons;
    applied_coupons.extend(system_coupon);

    PriceBreakdown {
        lines,
        subtotal,
        subtotal_after_instructor_discount,
        instructor_discount,
        system_discount,
        total_discount,
        tax,
        total,
        currency: config.currency.clone(),
        applied_coupons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edumart_catalog::CourseStatus;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn course(price: Decimal) -> CourseSnapshot {
        CourseSnapshot {
            id: Uuid::new_v4(),
            title: "Course".into(),
            thumbnail_url: None,
            instructor_id: Uuid::new_v4(),
            instructor_name: "Instructor".into(),
            original_price: price,
            status: CourseStatus::Published,
        }
    }

    fn applied(scope: CouponScope, amount: Decimal) -> AppliedCoupon {
        AppliedCoupon {
            scope,
            coupon_id: Uuid::new_v4(),
            code: "CODE".into(),
            discount_amount: amount,
        }
    }

    #[test]
    fn test_stacked_coupons_scenario() {
        let breakdown = compose(
            &PricingConfig::default(),
            vec![(course(dec!(500000)), Some(applied(CouponScope::Instructor, dec!(100000))))],
            Some(applied(CouponScope::System, dec!(50000))),
        );

        let line = &breakdown.lines[0];
        assert_eq!(line.unit_price, dec!(400000));
        assert_eq!(line.discount_percent, dec!(20));
        assert_eq!(breakdown.total, dec!(350000));
        assert_eq!(line.line_total, dec!(350000));
        assert_eq!(line.platform_fee_amount, dec!(105000));
        assert_eq!(line.instructor_earnings, dec!(245000));
        assert_eq!(breakdown.instructor_discount, dec!(100000));
        assert_eq!(breakdown.system_discount, dec!(50000));
        assert_eq!(breakdown.applied_coupons.len(), 2);
    }

    #[test]
    fn test_system_discount_capped_at_remaining_subtotal() {
        let breakdown = compose(
            &PricingConfig::default(),
            vec![(course(dec!(100000)), Some(applied(CouponScope::Instructor, dec!(80000))))],
            Some(applied(CouponScope::System, dec!(50000))),
        );
        assert_eq!(breakdown.system_discount, dec!(20000));
        assert_eq!(breakdown.total, dec!(0));
        assert_eq!(breakdown.lines[0].platform_fee_amount, dec!(0));
    }

    #[test]
    fn test_free_course_has_no_coupons_recorded() {
        let breakdown = compose(
            &PricingConfig::default(),
            vec![(course(dec!(0)), None)],
            Some(applied(CouponScope::System, dec!(50000))),
        );
        assert_eq!(breakdown.total, dec!(0));
        assert!(breakdown.applied_coupons.is_empty());
    }

    #[test]
    fn test_system_discount_split_across_lines() {
        let breakdown = compose(
            &PricingConfig::default(),
            vec![(course(dec!(300000)), None), (course(dec!(100000)), None)],
            Some(applied(CouponScope::System, dec!(100000))),
        );
        assert_eq!(breakdown.lines[0].system_discount, dec!(75000));
        assert_eq!(breakdown.lines[1].system_discount, dec!(25000));
        assert_eq!(breakdown.total, dec!(300000));
    }

    #[test]
    fn test_tax_is_applied_after_discounts() {
        let config = PricingConfig {
            tax_rate: dec!(0.1),
            ..PricingConfig::default()
        };
        let breakdown = compose(&config, vec![(course(dec!(200000)), None)], Some(applied(CouponScope::System, dec!(50000))));
        assert_eq!(breakdown.tax, dec!(15000));
        assert_eq!(breakdown.total, dec!(165000));
    }

    proptest! {
        #[test]
        fn prop_totals_and_lines_balance(
            prices in proptest::collection::vec(0u64..5_000_000u64, 1..6),
            instructor_pct in proptest::collection::vec(0u64..=100u64, 6),
            system_amount in 0u64..3_000_000u64,
            fee_percent in 0u64..=100u64,
        ) {
            let config = PricingConfig {
                platform_fee_percent: Decimal::from(fee_percent),
                ..PricingConfig::default()
            };
            let lines = prices
                .iter()
                .zip(instructor_pct.iter())
                .map(|(price, pct)| {
                    let price = Decimal::new(*price as i64, 2);
                    let discount = percent_of(price, Decimal::from(*pct));
                    (course(price), Some(applied(CouponScope::Instructor, discount)))
                })
                .collect();
            let system = Some(applied(CouponScope::System, Decimal::new(system_amount as i64, 2)));

            let b = compose(&config, lines, system);

            prop_assert_eq!(b.total_discount, b.instructor_discount + b.system_discount);
            prop_assert_eq!(b.total, b.subtotal - b.total_discount + b.tax);
            prop_assert!(b.total >= Decimal::ZERO);
            let line_sum: Decimal = b.lines.iter().map(|l| l.line_total).sum();
            prop_assert_eq!(line_sum, b.subtotal - b.total_discount);
            for line in &b.lines {
                prop_assert_eq!(line.line_total, line.platform_fee_amount + line.instructor_earnings);
                prop_assert_eq!(line.unit_price, line.original_price - line.instructor_discount);
                prop_assert!(line.line_total >= Decimal::ZERO);
                prop_assert!(line.instructor_earnings >= Decimal::ZERO);
            }
        }
    }
}
